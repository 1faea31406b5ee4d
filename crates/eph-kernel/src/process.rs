//! The mirrored process object.
//!
//! One `Process` lives in each kernel; the pair shares a PID and advances
//! in lockstep. State transitions are monotone (`idle → running → … →
//! dead`) and broadcast on a condition variable so `Wait` can block without
//! polling.

use std::path::PathBuf;
use std::sync::Arc;

use eph_common::{Pid, Role};
use parking_lot::{Condvar, Mutex};
use rand::RngCore;

use crate::fd::FdTable;
use crate::port::{PortEndpoint, PortPair};
use crate::program::Program;
use crate::rusage::Rusage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcState {
    Idle = 0,
    Running = 1,
    Sleeping = 2,
    Stopped = 3,
    Zombie = 4,
    Dead = 5,
}

pub struct Process {
    pub role: Role,
    pub pid: Pid,
    pub prog: Arc<Program>,
    pub args: Vec<String>,
    /// Secret per-process share fed to every circuit.
    pub key: Vec<u8>,

    state: Mutex<ProcState>,
    state_cv: Condvar,

    pub cwd: Mutex<PathBuf>,
    pub chroot: Mutex<PathBuf>,
    pub fds: Mutex<FdTable>,
    /// Persistent opaque memory; only the garbler carries real contents.
    pub mem: Mutex<Vec<u8>>,
    pub pc: Mutex<u16>,
    pub exit_val: Mutex<Option<i32>>,
    pub rusage: Mutex<Rusage>,
    port: Mutex<Option<PortPair>>,
}

impl Process {
    pub fn new(role: Role, pid: Pid, prog: Arc<Program>, args: Vec<String>) -> Arc<Process> {
        let mut key = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut key);
        Arc::new(Process {
            role,
            pid,
            prog,
            args,
            key,
            state: Mutex::new(ProcState::Idle),
            state_cv: Condvar::new(),
            cwd: Mutex::new(PathBuf::from("/")),
            chroot: Mutex::new(PathBuf::from("/")),
            fds: Mutex::new(FdTable::with_stdio(role.is_garbler())),
            mem: Mutex::new(Vec::new()),
            pc: Mutex::new(0),
            exit_val: Mutex::new(None),
            rusage: Mutex::new(Rusage::default()),
            port: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ProcState {
        *self.state.lock()
    }

    /// Monotone state advance; regressions are ignored. Waiters are woken
    /// on every effective transition.
    pub fn advance(&self, next: ProcState) {
        let mut guard = self.state.lock();
        if next > *guard {
            *guard = next;
            self.state_cv.notify_all();
        }
    }

    /// Block until the process reaches zombie, then return its exit value.
    pub fn wait_zombie(&self) -> i32 {
        let mut guard = self.state.lock();
        while *guard < ProcState::Zombie {
            self.state_cv.wait(&mut guard);
        }
        drop(guard);
        self.exit_val.lock().unwrap_or(0)
    }

    /// The process's mailbox, created on first use.
    pub fn port_endpoint(&self, server: bool) -> PortEndpoint {
        let mut guard = self.port.lock();
        let pair = guard.get_or_insert_with(|| PortPair::new(&mut rand::thread_rng()));
        pair.endpoint(server, self.role)
    }
}
