//! Seams to the external MPC machinery.
//!
//! The garbled-circuit evaluator and streaming compiler are consumed as a
//! black box behind [`CircuitRunner`]; the oblivious-transfer context bound
//! to each peer connection sits behind [`OtFactory`]. The kernel only
//! assembles inputs, hands them to the runner together with the peer
//! channel, and decodes the output vector.
//!
//! [`ScriptedRunner`] is the in-process stand-in: it replays canned output
//! vectors per state, which is exactly what the kernel tests (and a
//! single-host demo) need -- both peers replay the same script, mirroring
//! the lockstep of a real joint evaluation.

use std::collections::VecDeque;
use std::time::Duration;

use eph_common::Role;
use rustc_hash::FxHashMap;

use crate::conn::PeerChannel;
use crate::error::KernelError;

// ── Inputs and statistics ──────────────────────────────────────────────

/// One ordered circuit input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Int(i32),
    Bytes(Vec<u8>),
}

impl Input {
    /// Bit size exchanged for dynamically compiled circuits.
    pub fn bit_len(&self) -> u32 {
        match self {
            Input::Int(_) => 32,
            Input::Bytes(b) => (b.len() as u32) * 8,
        }
    }
}

/// Execution statistics reported by the runner for one state.
#[derive(Debug, Clone, Default)]
pub struct ExecStats {
    pub compile: Duration,
    pub stream: Duration,
    pub garble: Duration,
    pub gates: u64,
    pub xor_gates: u64,
    pub nonxor_gates: u64,
    pub wires: u64,
}

// ── Circuit forms ──────────────────────────────────────────────────────

/// A compiled circuit: declared arity plus the opaque body consumed by the
/// runner.
#[derive(Debug, Clone)]
pub struct CompiledCircuit {
    pub name: String,
    pub input_arity: usize,
    pub output_arity: usize,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum CircuitForm {
    Compiled(CompiledCircuit),
    /// Source compiled on first use against the concrete input sizes.
    Dynamic { source: String },
}

/// One state of a program's state machine.
#[derive(Debug, Clone)]
pub struct CircuitState {
    pub name: String,
    /// Assigned by the symbol table; states without a PC are loadable but
    /// fatal when reached.
    pub pc: Option<u16>,
    pub form: CircuitForm,
}

// ── OT context seam ────────────────────────────────────────────────────

/// Opaque oblivious-transfer context bound to one peer connection.
pub trait OtContext: Send {}

pub trait OtFactory: Send + Sync {
    fn context(&self) -> Box<dyn OtContext>;
}

/// Stand-in for runners that do not consume OT (the scripted runner).
pub struct NullOt;

impl OtContext for NullOt {}

pub struct NullOtFactory;

impl OtFactory for NullOtFactory {
    fn context(&self) -> Box<dyn OtContext> {
        Box::new(NullOt)
    }
}

// ── Runner seam ────────────────────────────────────────────────────────

/// The black-box circuit evaluator.
pub trait CircuitRunner: Send {
    /// Run a compiled circuit in the role-appropriate mode.
    fn run_compiled(
        &mut self,
        role: Role,
        circuit: &CompiledCircuit,
        inputs: &[Input],
        chan: &mut PeerChannel,
        ot: &mut dyn OtContext,
    ) -> Result<(Vec<Vec<u8>>, ExecStats), KernelError>;

    /// Compile a dynamic source against both peers' input sizes, then
    /// stream-execute it.
    fn run_dynamic(
        &mut self,
        role: Role,
        name: &str,
        source: &str,
        garbler_sizes: &[u32],
        evaluator_sizes: &[u32],
        chan: &mut PeerChannel,
        ot: &mut dyn OtContext,
    ) -> Result<(Vec<Vec<u8>>, ExecStats), KernelError>;
}

/// Creates one runner per process.
pub trait RunnerFactory: Send + Sync {
    fn runner(&self, program: &str) -> Box<dyn CircuitRunner>;
}

// ── Scripted runner ────────────────────────────────────────────────────

/// Replays canned output vectors keyed by state name.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    steps: FxHashMap<String, VecDeque<Vec<Vec<u8>>>>,
}

impl ScriptedRunner {
    pub fn new() -> ScriptedRunner {
        ScriptedRunner::default()
    }

    /// Queue the output vector the next evaluation of `state` produces.
    pub fn push_step(&mut self, state: &str, fields: Vec<Vec<u8>>) {
        self.steps.entry(state.to_string()).or_default().push_back(fields);
    }

    fn pop(&mut self, state: &str) -> Result<Vec<Vec<u8>>, KernelError> {
        self.steps
            .get_mut(state)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| {
                KernelError::Record(format!("scripted runner has no step for state '{}'", state))
            })
    }
}

impl CircuitRunner for ScriptedRunner {
    fn run_compiled(
        &mut self,
        _role: Role,
        circuit: &CompiledCircuit,
        inputs: &[Input],
        _chan: &mut PeerChannel,
        _ot: &mut dyn OtContext,
    ) -> Result<(Vec<Vec<u8>>, ExecStats), KernelError> {
        if inputs.len() > circuit.input_arity {
            return Err(KernelError::Record(format!(
                "{} inputs for '{}' with arity {}",
                inputs.len(),
                circuit.name,
                circuit.input_arity
            )));
        }
        let fields = self.pop(&circuit.name)?;
        Ok((fields, ExecStats::default()))
    }

    fn run_dynamic(
        &mut self,
        _role: Role,
        name: &str,
        _source: &str,
        _garbler_sizes: &[u32],
        _evaluator_sizes: &[u32],
        _chan: &mut PeerChannel,
        _ot: &mut dyn OtContext,
    ) -> Result<(Vec<Vec<u8>>, ExecStats), KernelError> {
        let fields = self.pop(name)?;
        Ok((fields, ExecStats::default()))
    }
}

/// Hands each process a clone of the script registered for its program.
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: FxHashMap<String, ScriptedRunner>,
}

impl ScriptedFactory {
    pub fn new() -> ScriptedFactory {
        ScriptedFactory::default()
    }

    pub fn insert(&mut self, program: &str, runner: ScriptedRunner) {
        self.scripts.insert(program.to_string(), runner);
    }
}

impl RunnerFactory for ScriptedFactory {
    fn runner(&self, program: &str) -> Box<dyn CircuitRunner> {
        Box::new(
            self.scripts
                .get(program)
                .cloned()
                .unwrap_or_default(),
        )
    }
}
