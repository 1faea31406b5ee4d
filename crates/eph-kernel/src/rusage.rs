//! Per-process resource accounting.
//!
//! Every circuit evaluation reports its phase timings and gate counts; the
//! process accumulates them and the kernel dumps the totals at exit when
//! rusage tracing is on.

use std::fmt;
use std::time::Duration;

use crate::circuit::ExecStats;

#[derive(Debug, Clone, Default)]
pub struct Rusage {
    /// Kernel-side time spent in syscall dispatch.
    pub sys: Duration,
    /// Time spent inside circuit evaluation.
    pub user: Duration,
    pub compile: Duration,
    pub stream: Duration,
    pub garble: Duration,
    pub gates: u64,
    pub xor_gates: u64,
    pub nonxor_gates: u64,
    pub wires: u64,
    /// Number of circuit states executed.
    pub states: u64,
}

impl Rusage {
    pub fn add_stats(&mut self, stats: &ExecStats) {
        self.compile += stats.compile;
        self.stream += stats.stream;
        self.garble += stats.garble;
        self.gates += stats.gates;
        self.xor_gates += stats.xor_gates;
        self.nonxor_gates += stats.nonxor_gates;
        self.wires += stats.wires;
        self.states += 1;
    }

    pub fn add_user(&mut self, d: Duration) {
        self.user += d;
    }

    pub fn add_sys(&mut self, d: Duration) {
        self.sys += d;
    }
}

impl fmt::Display for Rusage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "states={} sys={:?} user={:?} compile={:?} stream={:?} garble={:?} \
             gates={} xor={} nonxor={} wires={}",
            self.states,
            self.sys,
            self.user,
            self.compile,
            self.stream,
            self.garble,
            self.gates,
            self.xor_gates,
            self.nonxor_gates,
            self.wires
        )
    }
}
