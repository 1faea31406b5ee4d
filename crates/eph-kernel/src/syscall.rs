//! Syscall numbering and the packed syscall record.
//!
//! Every circuit evaluation produces an ordered output vector
//! `(mem, pc, call, arg0, argBuf?, arg1?)`. Trailing fields may be absent
//! and default to empty/zero. When the call is `Yield`, the decoded
//! `arg0`/`argBuf`/`arg1` are discarded and the previous record's values
//! are preserved, so the host re-enters with identical in-flight
//! parameters.

use std::fmt;

use eph_common::Pid;

use crate::error::KernelError;

// ---------------------------------------------------------------------------
// Call numbering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Sys {
    Exit = 1,
    Spawn = 2,
    Read = 3,
    Write = 4,
    Close = 5,
    Open = 6,
    Dial = 7,
    Listen = 8,
    Accept = 9,
    Chroot = 10,
    Openkey = 11,
    Getport = 12,
    Sendfd = 13,
    Recvfd = 14,
    Createmsg = 15,
    Wait = 16,
    Getpid = 17,
    Getrandom = 18,
    Tlsserver = 19,
    Tlshs = 20,
    Tlsstatus = 21,
    Continue = 22,
    Yield = 23,
    Next = 24,
}

impl Sys {
    pub fn from_u8(v: u8) -> Option<Sys> {
        use Sys::*;
        Some(match v {
            1 => Exit,
            2 => Spawn,
            3 => Read,
            4 => Write,
            5 => Close,
            6 => Open,
            7 => Dial,
            8 => Listen,
            9 => Accept,
            10 => Chroot,
            11 => Openkey,
            12 => Getport,
            13 => Sendfd,
            14 => Recvfd,
            15 => Createmsg,
            16 => Wait,
            17 => Getpid,
            18 => Getrandom,
            19 => Tlsserver,
            20 => Tlshs,
            21 => Tlsstatus,
            22 => Continue,
            23 => Yield,
            24 => Next,
            _ => return None,
        })
    }
}

impl fmt::Display for Sys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// The decoded result of one circuit evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyscallRecord {
    /// Replacement for the persistent memory when non-empty.
    pub mem: Vec<u8>,
    /// Next program counter.
    pub pc: u16,
    /// Selected host operation.
    pub call: u8,
    pub arg0: i32,
    pub arg_buf: Vec<u8>,
    pub arg1: i32,
}

impl SyscallRecord {
    /// The record fed into the first state: `arg0` carries the PID.
    pub fn initial(pid: Pid, init_pc: u16) -> SyscallRecord {
        SyscallRecord {
            mem: Vec::new(),
            pc: init_pc,
            call: 0,
            arg0: pid.as_i32(),
            arg_buf: Vec::new(),
            arg1: 0,
        }
    }

    /// Decode a circuit output vector. Field widths are fixed; a wrong
    /// width is a fatal record error. `prev` supplies the preserved values
    /// for `Yield`.
    pub fn decode(fields: &[Vec<u8>], prev: &SyscallRecord) -> Result<SyscallRecord, KernelError> {
        if fields.len() < 4 {
            return Err(KernelError::Record(format!(
                "output vector has {} fields, need at least 4",
                fields.len()
            )));
        }
        if fields.len() > 6 {
            return Err(KernelError::Record(format!(
                "output vector has {} fields, at most 6 allowed",
                fields.len()
            )));
        }

        let mem = fields[0].clone();
        let pc_raw = &fields[1];
        if pc_raw.len() != 2 {
            return Err(KernelError::Record(format!(
                "pc field is {} bytes, expected 2",
                pc_raw.len()
            )));
        }
        let pc = u16::from_be_bytes([pc_raw[0], pc_raw[1]]);

        let call_raw = &fields[2];
        if call_raw.len() != 1 {
            return Err(KernelError::Record(format!(
                "call field is {} bytes, expected 1",
                call_raw.len()
            )));
        }
        let call = call_raw[0];

        let arg0_raw = &fields[3];
        if arg0_raw.len() != 4 {
            return Err(KernelError::Record(format!(
                "arg0 field is {} bytes, expected 4",
                arg0_raw.len()
            )));
        }
        let arg0 = i32::from_be_bytes([arg0_raw[0], arg0_raw[1], arg0_raw[2], arg0_raw[3]]);

        let arg_buf = fields.get(4).cloned().unwrap_or_default();
        let arg1 = match fields.get(5) {
            None => 0,
            Some(raw) if raw.len() == 4 => {
                i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])
            }
            Some(raw) => {
                return Err(KernelError::Record(format!(
                    "arg1 field is {} bytes, expected 4",
                    raw.len()
                )))
            }
        };

        if call == Sys::Yield as u8 {
            // The circuit re-enters with the previous in-flight values.
            return Ok(SyscallRecord {
                mem,
                pc,
                call,
                arg0: prev.arg0,
                arg_buf: prev.arg_buf.clone(),
                arg1: prev.arg1,
            });
        }

        Ok(SyscallRecord {
            mem,
            pc,
            call,
            arg0,
            arg_buf,
            arg1,
        })
    }
}

/// Assemble an output vector the way a circuit would emit it; shared by the
/// scripted runner and the tests.
pub fn record_fields(
    mem: &[u8],
    pc: u16,
    call: Sys,
    arg0: i32,
    arg_buf: Option<&[u8]>,
    arg1: Option<i32>,
) -> Vec<Vec<u8>> {
    let mut fields = vec![
        mem.to_vec(),
        pc.to_be_bytes().to_vec(),
        vec![call as u8],
        arg0.to_be_bytes().to_vec(),
    ];
    if let Some(buf) = arg_buf {
        fields.push(buf.to_vec());
        if let Some(a1) = arg1 {
            fields.push(a1.to_be_bytes().to_vec());
        }
    } else {
        assert!(arg1.is_none(), "arg1 requires arg_buf");
    }
    fields
}
