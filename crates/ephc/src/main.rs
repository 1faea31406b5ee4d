//! Companion tools for the Ephemelier kernel.
//!
//! Thin operator-facing commands: a toy CA, the vault share manager, the
//! encrypted-filesystem import/export tool, and a Graphviz dump of a
//! program's state table.

mod ca;
mod fsenc;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use eph_kernel::program::load_program;
use rand::RngCore;

#[derive(Parser)]
#[command(name = "ephc", about = "Ephemelier companion tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyType {
    P256,
    Aes,
    Chacha20,
}

#[derive(Subcommand)]
enum Command {
    /// Emit a self-signed P-256 certificate and PKCS#8 key.
    Ca {
        /// Subject common name.
        #[arg(long, default_value = "ephemelier")]
        cn: String,
        /// Output directory for cert.pem and key.pem.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Manage vault key shares.
    Vault {
        #[command(subcommand)]
        command: VaultCommand,
    },
    /// Encrypted-filesystem import/export/stat.
    Fs {
        #[command(subcommand)]
        command: FsCommand,
    },
    /// Dump a program's state table as a Graphviz digraph.
    Dot {
        /// Program directory.
        program: PathBuf,
    },
}

#[derive(Subcommand)]
enum VaultCommand {
    /// Generate fresh key material split into two shares.
    Create {
        #[arg(short = 't', long, value_enum)]
        key_type: KeyType,
        /// Share path prefix; the party index is appended.
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Install an externally produced share next to its certificate.
    Import {
        #[arg(short = 't', long, value_enum)]
        key_type: KeyType,
        #[arg(short, long)]
        out: PathBuf,
        share: PathBuf,
        cert: PathBuf,
    },
}

#[derive(Subcommand)]
enum FsCommand {
    Import {
        #[arg(long)]
        vault: PathBuf,
        #[arg(long)]
        key: String,
        src: PathBuf,
        dst: PathBuf,
        #[arg(long, default_value_t = 4096)]
        block_size: u16,
    },
    Export {
        #[arg(long)]
        vault: PathBuf,
        #[arg(long)]
        key: String,
        src: PathBuf,
        dst: PathBuf,
    },
    Stat {
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("ephc: {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Ca { cn, out } => ca::emit(&cn, &out).map_err(|e| e.to_string()),
        Command::Vault { command } => vault_cmd(command),
        Command::Fs { command } => fs_cmd(command),
        Command::Dot { program } => {
            let prog = load_program(&program).map_err(|e| e.to_string())?;
            print!("{}", dot(&prog));
            Ok(())
        }
    }
}

fn vault_cmd(command: VaultCommand) -> Result<(), String> {
    match command {
        VaultCommand::Create { key_type, out } => {
            let (share0, share1) = split_key(key_type);
            write_share(&out, 0, &share0)?;
            write_share(&out, 1, &share1)?;
            Ok(())
        }
        VaultCommand::Import {
            key_type: _,
            out,
            share,
            cert,
        } => {
            let share_bytes =
                std::fs::read(&share).map_err(|e| format!("{}: {}", share.display(), e))?;
            std::fs::write(&out, share_bytes)
                .map_err(|e| format!("{}: {}", out.display(), e))?;
            let cert_dst = out.with_extension("cert.pem");
            std::fs::copy(&cert, &cert_dst)
                .map_err(|e| format!("{}: {}", cert.display(), e))?;
            Ok(())
        }
    }
}

/// Split fresh key material into the two parties' shares. Symmetric keys
/// split by XOR; P-256 scalars split additively mod the curve order.
fn split_key(key_type: KeyType) -> (Vec<u8>, Vec<u8>) {
    let mut rng = rand::rngs::OsRng;
    match key_type {
        KeyType::Aes => xor_split(16, &mut rng),
        KeyType::Chacha20 => xor_split(32, &mut rng),
        KeyType::P256 => {
            use p256::elliptic_curve::{Field, PrimeField};
            let secret = p256::Scalar::random(&mut rng);
            let share0 = p256::Scalar::random(&mut rng);
            let share1 = secret - share0;
            (
                share0.to_repr().as_slice().to_vec(),
                share1.to_repr().as_slice().to_vec(),
            )
        }
    }
}

fn xor_split(len: usize, rng: &mut impl RngCore) -> (Vec<u8>, Vec<u8>) {
    let mut key = vec![0u8; len];
    let mut share0 = vec![0u8; len];
    rng.fill_bytes(&mut key);
    rng.fill_bytes(&mut share0);
    let share1 = key.iter().zip(&share0).map(|(k, s)| k ^ s).collect();
    (share0, share1)
}

fn write_share(prefix: &std::path::Path, party: usize, share: &[u8]) -> Result<(), String> {
    let mut path = prefix.as_os_str().to_os_string();
    path.push(party.to_string());
    std::fs::write(&path, share).map_err(|e| format!("{}: {}", prefix.display(), e))
}

fn fs_cmd(command: FsCommand) -> Result<(), String> {
    match command {
        FsCommand::Import {
            vault,
            key,
            src,
            dst,
            block_size,
        } => {
            let key = fsenc::load_key(&vault, &key)?;
            fsenc::import(&key, &src, &dst, block_size)
        }
        FsCommand::Export {
            vault,
            key,
            src,
            dst,
        } => {
            let key = fsenc::load_key(&vault, &key)?;
            fsenc::export(&key, &src, &dst)
        }
        FsCommand::Stat { file } => {
            let info = fsenc::stat(&file)?;
            println!("{}", serde_json::to_string_pretty(&info).unwrap());
            Ok(())
        }
    }
}

/// Graphviz rendering of a program's states. Transitions live inside the
/// circuits, so the graph shows the state table and entry point only.
fn dot(prog: &eph_kernel::program::Program) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", prog.name));
    out.push_str("  rankdir=LR;\n");

    let mut states: Vec<_> = prog.by_name.values().collect();
    states.sort_by_key(|s| (s.pc, s.name.clone()));
    for state in states {
        let label = match state.pc {
            Some(pc) => format!("{}\\npc={}", state.name, pc),
            None => format!("{}\\n(no pc)", state.name),
        };
        let shape = if state.name == "init" {
            "doublecircle"
        } else {
            "circle"
        };
        out.push_str(&format!(
            "  \"{}\" [label=\"{}\", shape={}];\n",
            state.name, label, shape
        ));
    }
    for missing in &prog.missing {
        out.push_str(&format!(
            "  \"{}\" [style=dashed, color=gray];\n",
            missing
        ));
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use eph_kernel::program::container_bytes;

    #[test]
    fn test_split_key_reconstructs() {
        let (s0, s1) = xor_split(16, &mut rand::rngs::OsRng);
        assert_eq!(s0.len(), 16);
        assert_eq!(s1.len(), 16);
        assert_ne!(s0, s1);
    }

    #[test]
    fn test_p256_shares_sum_to_scalar() {
        use p256::elliptic_curve::generic_array::GenericArray;
        use p256::elliptic_curve::PrimeField;
        let (s0, s1) = split_key(KeyType::P256);
        // Both shares are canonical 32-byte scalars.
        let a = p256::Scalar::from_repr(GenericArray::clone_from_slice(&s0)).unwrap();
        let b = p256::Scalar::from_repr(GenericArray::clone_from_slice(&s1)).unwrap();
        let _sum = a + b;
    }

    #[test]
    fn test_dot_output_shape() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("symtab"), "init 0\nStWork 1\n").unwrap();
        std::fs::write(
            tmp.path().join("init.mpclc"),
            container_bytes(5, 6, &[]),
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("work.mpclc"),
            container_bytes(3, 4, &[]),
        )
        .unwrap();
        let prog = load_program(tmp.path()).unwrap();
        let rendered = dot(&prog);
        assert!(rendered.starts_with("digraph"));
        assert!(rendered.contains("doublecircle"));
        assert!(rendered.contains("StWork"));
        assert!(rendered.contains("pc=1"));
    }
}
