//! Program loading.
//!
//! A program is a directory containing a `symtab` file, compiled circuits
//! (`<name>.mpclc`) and dynamic sources (`<name>.dmpcl`). Filenames
//! normalize to state names via [`make_name`]; the distinguished entry
//! state is `init` and must resolve to a PC. A state missing from the
//! symbol table (or declared without a file) is recorded and warned about,
//! and becomes fatal only when the scheduler actually reaches it.
//!
//! ## Compiled-circuit container
//!
//! `EPHC` magic (4) ∥ `u16` input arity ∥ `u16` output arity ∥ opaque body.
//! The body belongs to the external circuit runner.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::circuit::{CircuitForm, CircuitState, CompiledCircuit};
use crate::error::KernelError;

pub const CONTAINER_MAGIC: &[u8; 4] = b"EPHC";

/// A loaded program.
pub struct Program {
    pub name: String,
    pub init_pc: u16,
    pub by_name: FxHashMap<String, Arc<CircuitState>>,
    pub by_pc: FxHashMap<u16, Arc<CircuitState>>,
    /// States present in only one of {files, symtab}.
    pub missing: Vec<String>,
}

impl Program {
    pub fn state_for_pc(&self, pc: u16) -> Option<&Arc<CircuitState>> {
        self.by_pc.get(&pc)
    }
}

/// Normalize a circuit filename to its state name: strip the extension,
/// split on `_`, camel-case, prefix `St` -- except the entry `init`.
pub fn make_name(filename: &str) -> String {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => filename,
    };
    if stem == "init" {
        return "init".to_string();
    }
    let mut name = String::from("St");
    for part in stem.split('_') {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    name
}

/// Serialize a compiled-circuit container.
pub fn container_bytes(input_arity: u16, output_arity: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(CONTAINER_MAGIC);
    out.extend_from_slice(&input_arity.to_be_bytes());
    out.extend_from_slice(&output_arity.to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn parse_container(name: &str, raw: &[u8]) -> Result<CompiledCircuit, KernelError> {
    if raw.len() < 8 || &raw[..4] != CONTAINER_MAGIC {
        return Err(KernelError::Load(format!(
            "'{}' is not a compiled circuit container",
            name
        )));
    }
    Ok(CompiledCircuit {
        name: name.to_string(),
        input_arity: u16::from_be_bytes([raw[4], raw[5]]) as usize,
        output_arity: u16::from_be_bytes([raw[6], raw[7]]) as usize,
        body: raw[8..].to_vec(),
    })
}

fn parse_symtab(text: &str) -> Result<FxHashMap<String, u16>, KernelError> {
    let mut map = FxHashMap::default();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (name, pc) = match (parts.next(), parts.next()) {
            (Some(n), Some(p)) => (n, p),
            _ => {
                return Err(KernelError::Load(format!(
                    "symtab line {}: expected 'name pc'",
                    lineno + 1
                )))
            }
        };
        let pc: u16 = pc.parse().map_err(|_| {
            KernelError::Load(format!("symtab line {}: bad pc '{}'", lineno + 1, pc))
        })?;
        map.insert(name.to_string(), pc);
    }
    Ok(map)
}

/// Load a program directory.
pub fn load_program(dir: &Path) -> Result<Arc<Program>, KernelError> {
    let prog_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".to_string());

    let mut symtab: FxHashMap<String, u16> = FxHashMap::default();
    let mut forms: Vec<(String, CircuitForm)> = Vec::new();

    let entries = fs::read_dir(dir)
        .map_err(|e| KernelError::Load(format!("{}: {}", dir.display(), e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| KernelError::Load(e.to_string()))?;
        let fname = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if fname == "symtab" {
            let text = fs::read_to_string(&path)
                .map_err(|e| KernelError::Load(format!("symtab: {}", e)))?;
            symtab = parse_symtab(&text)?;
        } else if fname.ends_with(".mpclc") {
            let raw = fs::read(&path)
                .map_err(|e| KernelError::Load(format!("{}: {}", fname, e)))?;
            let state = make_name(&fname);
            let circuit = parse_container(&state, &raw)?;
            forms.push((state, CircuitForm::Compiled(circuit)));
        } else if fname.ends_with(".dmpcl") {
            let source = fs::read_to_string(&path)
                .map_err(|e| KernelError::Load(format!("{}: {}", fname, e)))?;
            forms.push((make_name(&fname), CircuitForm::Dynamic { source }));
        }
    }

    let mut by_name = FxHashMap::default();
    let mut by_pc = FxHashMap::default();
    let mut missing = Vec::new();

    for (state_name, form) in forms {
        let pc = symtab.get(&state_name).copied();
        if pc.is_none() {
            eprintln!(
                "[eph] program {}: state '{}' has no symtab entry",
                prog_name, state_name
            );
            missing.push(state_name.clone());
        }
        let state = Arc::new(CircuitState {
            name: state_name.clone(),
            pc,
            form,
        });
        if let Some(pc) = pc {
            by_pc.insert(pc, Arc::clone(&state));
        }
        by_name.insert(state_name, state);
    }

    // Symtab entries with no backing file.
    for name in symtab.keys() {
        if !by_name.contains_key(name) {
            eprintln!(
                "[eph] program {}: symtab entry '{}' has no circuit file",
                prog_name, name
            );
            missing.push(name.clone());
        }
    }

    let init = by_name
        .get("init")
        .ok_or_else(|| KernelError::Load(format!("program {}: no init state", prog_name)))?;
    let init_pc = init
        .pc
        .ok_or_else(|| KernelError::Load(format!("program {}: init has no pc", prog_name)))?;

    Ok(Arc::new(Program {
        name: prog_name,
        init_pc,
        by_name,
        by_pc,
        missing,
    }))
}
