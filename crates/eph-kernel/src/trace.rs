//! ktrace-style call/return/exit tracing.
//!
//! Output goes to stderr with a `[eph:<role>]` prefix, one line per traced
//! event, gated by the kernel's trace flags.

use eph_common::{Pid, Role, TraceFlags};

use crate::rusage::Rusage;
use crate::syscall::{Sys, SyscallRecord};

#[derive(Clone, Copy)]
pub struct Ktrace {
    flags: TraceFlags,
    role: Role,
}

impl Ktrace {
    pub fn new(flags: TraceFlags, role: Role) -> Ktrace {
        Ktrace { flags, role }
    }

    pub fn call(&self, pid: Pid, sys: Sys, rec: &SyscallRecord) {
        if self.flags.calls {
            eprintln!(
                "[eph:{}] {} {}(arg0={}, buf={}B, arg1={}) pc={}",
                self.role,
                pid,
                sys,
                rec.arg0,
                rec.arg_buf.len(),
                rec.arg1,
                rec.pc
            );
        }
    }

    pub fn ret(&self, pid: Pid, sys: Sys, rec: &SyscallRecord) {
        if self.flags.returns {
            eprintln!(
                "[eph:{}] {} {} = {} ({}B out)",
                self.role,
                pid,
                sys,
                rec.arg0,
                rec.arg_buf.len()
            );
        }
    }

    pub fn exit(&self, pid: Pid, val: i32) {
        if self.flags.exits {
            eprintln!("[eph:{}] {} exit {}", self.role, pid, val);
        }
    }

    pub fn rusage(&self, pid: Pid, ru: &Rusage) {
        if self.flags.rusage {
            eprintln!("[eph:{}] {} rusage {}", self.role, pid, ru);
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("[eph:{}] {}", self.role, msg);
    }
}
