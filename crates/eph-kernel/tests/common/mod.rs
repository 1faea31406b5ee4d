//! Shared harness for the kernel scenario tests.
//!
//! `FnRunner` stands in for the garbled-circuit evaluator: a closure per
//! program computes each state's output vector from the state name and the
//! assembled inputs, which is exactly the observable behavior of a real
//! joint evaluation replayed on both peers.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eph_common::{KernelParams, Pid, Role};
use eph_kernel::circuit::{
    CircuitRunner, CompiledCircuit, ExecStats, Input, NullOtFactory, OtContext, RunnerFactory,
};
use eph_kernel::kernel::{LocalConnector, NoConnector, TlsSettings};
use eph_kernel::process::Process;
use eph_kernel::program::{container_bytes, make_name};
use eph_kernel::{Kernel, KernelError, PeerChannel};
use rustc_hash::FxHashMap;

pub type StateFn =
    Arc<dyn Fn(Role, &str, &[Input]) -> Result<Vec<Vec<u8>>, String> + Send + Sync>;

pub struct FnRunner {
    f: StateFn,
}

impl CircuitRunner for FnRunner {
    fn run_compiled(
        &mut self,
        role: Role,
        circuit: &CompiledCircuit,
        inputs: &[Input],
        _chan: &mut PeerChannel,
        _ot: &mut dyn OtContext,
    ) -> Result<(Vec<Vec<u8>>, ExecStats), KernelError> {
        (self.f)(role, &circuit.name, inputs)
            .map(|fields| (fields, ExecStats::default()))
            .map_err(KernelError::Record)
    }

    fn run_dynamic(
        &mut self,
        role: Role,
        name: &str,
        _source: &str,
        _garbler_sizes: &[u32],
        _evaluator_sizes: &[u32],
        _chan: &mut PeerChannel,
        _ot: &mut dyn OtContext,
    ) -> Result<(Vec<Vec<u8>>, ExecStats), KernelError> {
        (self.f)(role, name, &[])
            .map(|fields| (fields, ExecStats::default()))
            .map_err(KernelError::Record)
    }
}

#[derive(Default)]
pub struct FnFactory {
    progs: FxHashMap<String, StateFn>,
}

impl FnFactory {
    pub fn new() -> FnFactory {
        FnFactory::default()
    }

    pub fn insert(
        &mut self,
        program: &str,
        f: impl Fn(Role, &str, &[Input]) -> Result<Vec<Vec<u8>>, String> + Send + Sync + 'static,
    ) {
        self.progs.insert(program.to_string(), Arc::new(f));
    }
}

impl RunnerFactory for FnFactory {
    fn runner(&self, program: &str) -> Box<dyn CircuitRunner> {
        let f = self
            .progs
            .get(program)
            .cloned()
            .unwrap_or_else(|| {
                let name = program.to_string();
                Arc::new(move |_role, _state, _inputs| {
                    Err(format!("no harness for program '{}'", name))
                })
            });
        Box::new(FnRunner { f })
    }
}

/// Write a program directory: `states` are `(file stem, pc)` pairs; the
/// symtab entry uses the normalized state name.
pub fn write_program(root: &Path, name: &str, states: &[(&str, u16)]) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let mut symtab = String::new();
    for (stem, pc) in states {
        symtab.push_str(&format!("{} {}\n", make_name(stem), pc));
        std::fs::write(
            dir.join(format!("{}.mpclc", stem)),
            container_bytes(5, 6, &[]),
        )
        .unwrap();
    }
    std::fs::write(dir.join("symtab"), symtab).unwrap();
}

/// Build a connected garbler/evaluator kernel pair sharing one program
/// root and filesystem root.
pub fn paired_kernels(
    program_root: &Path,
    fs_root: &Path,
    g_factory: FnFactory,
    e_factory: FnFactory,
    tls: Option<(TlsSettings, TlsSettings)>,
) -> (Arc<Kernel>, Arc<Kernel>) {
    let params = |_role: Role| KernelParams {
        program_root: program_root.to_path_buf(),
        fs_root: fs_root.to_path_buf(),
        ..KernelParams::default()
    };
    let (g_tls, e_tls) = match tls {
        Some((g, e)) => (Some(g), Some(e)),
        None => (None, None),
    };

    let ek = Kernel::new(
        params(Role::Evaluator),
        Role::Evaluator,
        Box::new(NoConnector),
        Box::new(e_factory),
        Box::new(NullOtFactory),
        e_tls,
    );
    let connector = LocalConnector::new();
    connector.bind(&ek);
    let gk = Kernel::new(
        params(Role::Garbler),
        Role::Garbler,
        Box::new(connector),
        Box::new(g_factory),
        Box::new(NullOtFactory),
        g_tls,
    );
    (gk, ek)
}

/// The evaluator registers its process half on a separate thread; poll
/// briefly for it.
pub fn find_proc_retry(kernel: &Arc<Kernel>, pid: Pid) -> Arc<Process> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(p) = kernel.find_process(pid) {
            return p;
        }
        assert!(Instant::now() < deadline, "process {} never appeared", pid);
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Shorthand for input-vector checks inside state closures.
pub fn arg0_of(inputs: &[Input]) -> i32 {
    match inputs.first() {
        Some(Input::Int(v)) => *v,
        other => panic!("arg0 missing: {:?}", other),
    }
}

pub fn argbuf_of(role: Role, inputs: &[Input]) -> &[u8] {
    // Garbler layout: [arg0, key, mem, argBuf, arg1]; evaluator:
    // [arg0, key, argBuf].
    let idx = if role.is_garbler() { 3 } else { 2 };
    match inputs.get(idx) {
        Some(Input::Bytes(b)) => b,
        other => panic!("argBuf missing: {:?}", other),
    }
}
