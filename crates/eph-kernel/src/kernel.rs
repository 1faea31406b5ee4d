//! Kernel scheduler and syscall dispatch.
//!
//! One kernel per peer. The garbler creates processes and performs the real
//! host I/O; the evaluator accepts the mirrored half over a fresh framed
//! channel per process and mirrors every descriptor id the garbler
//! allocates. The per-state loop is symmetric: evaluate the circuit named
//! by the program counter, decode the syscall record, dispatch, continue
//! until `Exit`.
//!
//! Descriptor-synchronization rule: whenever the garbler allocates an fd id
//! the evaluator must mirror, the id travels as a raw big-endian `i32`
//! frame right after the originating syscall's payload; a negative value is
//! `-errno` and no mirror is created.

use std::io::{Read as _, Seek, SeekFrom};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Instant;

use eph_common::{Errno, KernelParams, Pid, Role};
use eph_spdz::{dh, field, triple, Session};
use eph_tls::hs::GROUP_SECP256R1;
use eph_tls::{ServerConfig, ServerConnection, Suite, TlsError, TranscriptSigner};
use eph_wire::{duplex_pair, ControlMsg, TlsErrorMsg, TlsKex, TlsKexResult};
use parking_lot::Mutex;
use rand::RngCore;
use rustc_hash::FxHashMap;

use crate::circuit::{CircuitForm, CircuitRunner, Input, OtContext, OtFactory, RunnerFactory};
use crate::conn::{PeerChannel, PeerStream};
use crate::encfile::{EncHeader, HEADER_LEN};
use crate::error::KernelError;
use crate::fd::{Fd, FdKind, TlsConn, TlsFd};
use crate::path;
use crate::port::PortEndpoint;
use crate::process::{ProcState, Process};
use crate::program;
use crate::syscall::{Sys, SyscallRecord};
use crate::trace::Ktrace;
use crate::vault;

// ── Seams ──────────────────────────────────────────────────────────────

/// Supplies the framed stream a newly spawned process pair talks over.
pub trait PeerConnector: Send + Sync {
    fn connect(&self) -> Result<PeerStream, KernelError>;
}

/// TLS material shared by both peers: the (public) certificate and the
/// threshold signer handle.
pub struct TlsSettings {
    pub cert_der: Vec<u8>,
    pub suite: Suite,
    pub signer: Arc<dyn TranscriptSigner>,
}

// ── Kernel ─────────────────────────────────────────────────────────────

pub struct Kernel {
    pub params: KernelParams,
    pub role: Role,
    trace: Ktrace,
    procs: Mutex<FxHashMap<Pid, Arc<Process>>>,
    next_party: Mutex<u16>,
    connector: Box<dyn PeerConnector>,
    runners: Box<dyn RunnerFactory>,
    ot_factory: Box<dyn OtFactory>,
    tls: Option<TlsSettings>,
}

impl Kernel {
    pub fn new(
        params: KernelParams,
        role: Role,
        connector: Box<dyn PeerConnector>,
        runners: Box<dyn RunnerFactory>,
        ot_factory: Box<dyn OtFactory>,
        tls: Option<TlsSettings>,
    ) -> Arc<Kernel> {
        let trace = Ktrace::new(params.trace, role);
        Arc::new(Kernel {
            params,
            role,
            trace,
            procs: Mutex::new(FxHashMap::default()),
            next_party: Mutex::new(0),
            connector,
            runners,
            ot_factory,
            tls,
        })
    }

    pub fn find_process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.procs.lock().get(&pid).cloned()
    }

    pub fn process_count(&self) -> usize {
        self.procs.lock().len()
    }

    fn alloc_party_id(&self) -> u16 {
        let mut guard = self.next_party.lock();
        *guard += 1;
        *guard
    }

    // ── Startup ────────────────────────────────────────────────────────

    /// Garbler side: create a process pair for `name`, performing the PID
    /// exchange with the evaluator kernel, and start its scheduler thread.
    pub fn spawn_program(
        self: &Arc<Self>,
        name: &str,
        args: Vec<String>,
        parent: Option<&Process>,
    ) -> Result<Arc<Process>, KernelError> {
        if !self.role.is_garbler() {
            return Err(KernelError::Protocol(
                "only the garbler kernel creates processes".to_string(),
            ));
        }
        let prog = program::load_program(&self.params.program_root.join(name))?;
        let mut chan = PeerChannel::new(self.connector.connect()?);

        let gid = self.alloc_party_id();
        chan.send_u16(gid)?;
        chan.send_string(name)?;
        chan.flush()?;
        let eid = chan.recv_u16()?;

        let pid = Pid::new(gid, eid);
        let proc = Process::new(self.role, pid, prog, args);
        if let Some(parent) = parent {
            for id in 0..3 {
                let inherited = parent.fds.lock().get(id);
                if let Some(fd) = inherited {
                    proc.fds.lock().insert_at(id, fd.copy());
                }
            }
        }
        self.procs.lock().insert(pid, Arc::clone(&proc));

        let runner = self.runners.runner(name);
        let kernel = Arc::clone(self);
        let thread_proc = Arc::clone(&proc);
        std::thread::spawn(move || kernel.run(thread_proc, chan, runner));
        Ok(proc)
    }

    /// Evaluator side: accept the mirrored half of a process the garbler
    /// kernel created, reply with our party id, and start its scheduler
    /// thread.
    pub fn serve_peer(self: &Arc<Self>, stream: PeerStream) -> Result<Arc<Process>, KernelError> {
        if self.role.is_garbler() {
            return Err(KernelError::Protocol(
                "only the evaluator kernel accepts peers".to_string(),
            ));
        }
        let mut chan = PeerChannel::new(stream);
        let gid = chan.recv_u16()?;
        let name = chan.recv_string()?;
        let prog = program::load_program(&self.params.program_root.join(&name))?;

        let eid = self.alloc_party_id();
        let pid = Pid::new(gid, eid);
        let proc = Process::new(self.role, pid, prog, Vec::new());
        // Register before replying: once the garbler has our id, this
        // process must be findable (Getport, Wait).
        self.procs.lock().insert(pid, Arc::clone(&proc));
        chan.send_u16(eid)?;
        chan.flush()?;

        let runner = self.runners.runner(&name);
        let kernel = Arc::clone(self);
        let thread_proc = Arc::clone(&proc);
        std::thread::spawn(move || kernel.run(thread_proc, chan, runner));
        Ok(proc)
    }

    // ── Per-state loop ─────────────────────────────────────────────────

    fn run(self: Arc<Self>, proc: Arc<Process>, mut chan: PeerChannel, mut runner: Box<dyn CircuitRunner>) {
        proc.advance(ProcState::Running);
        let mut ot = self.ot_factory.context();
        match self.run_loop(&proc, &mut chan, runner.as_mut(), ot.as_mut()) {
            Ok(()) => {
                let val = proc.exit_val.lock().unwrap_or(0);
                self.trace.exit(proc.pid, val);
            }
            Err(e) => {
                self.trace.warn(&format!("{} terminated: {}", proc.pid, e));
            }
        }
        self.trace.rusage(proc.pid, &proc.rusage.lock());
        // Scoped release: the channel drops with this frame, descriptors
        // drop here, the process table entry stays for the parent's Wait.
        proc.fds.lock().close_all();
        proc.advance(ProcState::Zombie);
    }

    fn run_loop(
        self: &Arc<Self>,
        proc: &Arc<Process>,
        chan: &mut PeerChannel,
        runner: &mut dyn CircuitRunner,
        ot: &mut dyn OtContext,
    ) -> Result<(), KernelError> {
        let mut rec = SyscallRecord::initial(proc.pid, proc.prog.init_pc);
        let mut pc = proc.prog.init_pc;

        loop {
            let state = proc
                .prog
                .state_for_pc(pc)
                .cloned()
                .ok_or_else(|| KernelError::Load(format!("no circuit for pc {}", pc)))?;

            let inputs = self.assemble_inputs(proc, &rec);
            let started = Instant::now();
            let (fields, stats) = match &state.form {
                CircuitForm::Compiled(c) => {
                    let arity = c.input_arity.min(inputs.len());
                    runner.run_compiled(self.role, c, &inputs[..arity], chan, ot)?
                }
                CircuitForm::Dynamic { source } => {
                    let my_sizes: Vec<u32> = inputs.iter().map(Input::bit_len).collect();
                    let (g_sizes, e_sizes) = match self.role {
                        Role::Garbler => {
                            chan.send_lens(&my_sizes)?;
                            chan.flush()?;
                            let peer = chan.recv_lens()?;
                            (my_sizes, peer)
                        }
                        Role::Evaluator => {
                            let peer = chan.recv_lens()?;
                            chan.send_lens(&my_sizes)?;
                            chan.flush()?;
                            (peer, my_sizes)
                        }
                    };
                    runner.run_dynamic(
                        self.role,
                        &state.name,
                        source,
                        &g_sizes,
                        &e_sizes,
                        chan,
                        ot,
                    )?
                }
            };
            {
                let mut ru = proc.rusage.lock();
                ru.add_user(started.elapsed());
                ru.add_stats(&stats);
            }

            let decoded = SyscallRecord::decode(&fields, &rec)?;
            if self.role.is_garbler() && !decoded.mem.is_empty() {
                *proc.mem.lock() = decoded.mem.clone();
            }
            rec = decoded;
            *proc.pc.lock() = rec.pc;

            let sys = Sys::from_u8(rec.call)
                .ok_or_else(|| KernelError::Record(format!("unknown syscall {}", rec.call)))?;
            self.trace.call(proc.pid, sys, &rec);
            let dispatch_started = Instant::now();
            let exit = self.dispatch(proc, sys, &mut rec, chan)?;
            proc.rusage.lock().add_sys(dispatch_started.elapsed());
            self.trace.ret(proc.pid, sys, &rec);
            if exit {
                return Ok(());
            }
            pc = rec.pc;
        }
    }

    /// Ordered circuit inputs, truncated by the caller to the state arity.
    /// Garbler: `[arg0, key, mem, argBuf, arg1]`; evaluator:
    /// `[arg0, key, argBuf]`.
    fn assemble_inputs(&self, proc: &Process, rec: &SyscallRecord) -> Vec<Input> {
        match self.role {
            Role::Garbler => vec![
                Input::Int(rec.arg0),
                Input::Bytes(proc.key.clone()),
                Input::Bytes(proc.mem.lock().clone()),
                Input::Bytes(rec.arg_buf.clone()),
                Input::Int(rec.arg1),
            ],
            Role::Evaluator => vec![
                Input::Int(rec.arg0),
                Input::Bytes(proc.key.clone()),
                Input::Bytes(rec.arg_buf.clone()),
            ],
        }
    }

    // ── Dispatch ───────────────────────────────────────────────────────

    fn dispatch(
        self: &Arc<Self>,
        proc: &Arc<Process>,
        sys: Sys,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<bool, KernelError> {
        match sys {
            Sys::Exit => {
                *proc.exit_val.lock() = Some(rec.arg0);
                return Ok(true);
            }
            Sys::Spawn => self.sys_spawn(proc, rec)?,
            Sys::Read => self.sys_read(proc, rec),
            Sys::Write => self.sys_write(proc, rec),
            Sys::Close => self.sys_close(proc, rec),
            Sys::Open => self.sys_open(proc, rec, chan)?,
            Sys::Dial => self.sys_dial(proc, rec, chan)?,
            Sys::Listen => self.sys_listen(proc, rec, chan)?,
            Sys::Accept => self.sys_accept(proc, rec, chan)?,
            Sys::Chroot => self.sys_chroot(proc, rec),
            Sys::Openkey => self.sys_openkey(proc, rec, chan)?,
            Sys::Getport => self.sys_getport(proc, rec, chan)?,
            Sys::Sendfd => self.sys_sendfd(proc, rec),
            Sys::Recvfd => self.sys_recvfd(proc, rec, chan)?,
            Sys::Createmsg => self.sys_createmsg(proc, rec)?,
            Sys::Wait => self.sys_wait(proc, rec),
            Sys::Getpid => {
                rec.arg0 = proc.pid.as_i32();
            }
            Sys::Getrandom => self.sys_getrandom(rec),
            Sys::Tlsserver => self.sys_tlsserver(proc, rec, chan)?,
            Sys::Tlshs => self.sys_tlshs(proc, rec),
            Sys::Tlsstatus => self.sys_tlsstatus(proc, rec),
            Sys::Continue => {
                rec.arg0 = 0;
            }
            Sys::Yield | Sys::Next => {}
        }
        Ok(false)
    }

    // ── Local calls ────────────────────────────────────────────────────

    fn sys_read(&self, proc: &Process, rec: &mut SyscallRecord) {
        let max = rec.arg1.max(0) as usize;
        let fd = proc.fds.lock().get(rec.arg0);
        match fd {
            None => {
                rec.arg0 = Errno::EBADF.ret();
                rec.arg_buf.clear();
            }
            Some(fd) => {
                let (n, data) = fd.read(max);
                rec.arg0 = n;
                rec.arg_buf = data;
            }
        }
    }

    fn sys_write(&self, proc: &Process, rec: &mut SyscallRecord) {
        let len = (rec.arg1.max(0) as usize).min(rec.arg_buf.len());
        let fd = proc.fds.lock().get(rec.arg0);
        rec.arg0 = match fd {
            None => Errno::EBADF.ret(),
            Some(fd) => fd.write(&rec.arg_buf[..len]),
        };
    }

    fn sys_close(&self, proc: &Process, rec: &mut SyscallRecord) {
        let removed = proc.fds.lock().remove(rec.arg0);
        rec.arg0 = match removed {
            None => Errno::EBADF.ret(),
            Some(fd) => fd.close(),
        };
    }

    fn sys_chroot(&self, proc: &Process, rec: &mut SyscallRecord) {
        if self.role.is_garbler() {
            match String::from_utf8(rec.arg_buf.clone()) {
                Ok(s) => {
                    let p = Path::new(&s);
                    let abs = if p.is_absolute() {
                        p.to_path_buf()
                    } else {
                        Path::new("/").join(p)
                    };
                    *proc.chroot.lock() = path::clean(&abs);
                    rec.arg0 = 0;
                }
                Err(_) => rec.arg0 = Errno::EINVAL.ret(),
            }
        } else {
            rec.arg0 = 0;
        }
    }

    fn sys_getrandom(&self, rec: &mut SyscallRecord) {
        let n = rec.arg0;
        if !(0..=1 << 20).contains(&n) {
            rec.arg0 = Errno::EINVAL.ret();
            rec.arg_buf.clear();
            return;
        }
        let mut buf = vec![0u8; n as usize];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        rec.arg_buf = buf;
    }

    fn sys_wait(&self, proc: &Process, rec: &mut SyscallRecord) {
        let wanted = Pid::from_u32(rec.arg0 as u32);
        let child = self
            .procs
            .lock()
            .values()
            .find(|p| p.pid.half(self.role) == wanted.half(self.role) && p.pid != proc.pid)
            .cloned();
        match child {
            None => rec.arg0 = Errno::ECHILD.ret(),
            Some(child) => {
                let val = child.wait_zombie();
                self.procs.lock().remove(&child.pid);
                child.advance(ProcState::Dead);
                rec.arg0 = val;
            }
        }
    }

    // ── Spawn ──────────────────────────────────────────────────────────

    fn sys_spawn(self: &Arc<Self>, proc: &Arc<Process>, rec: &mut SyscallRecord) -> Result<(), KernelError> {
        if !self.role.is_garbler() {
            // Child registration arrives through the kernel acceptor.
            rec.arg0 = 0;
            return Ok(());
        }
        let text = match String::from_utf8(rec.arg_buf.clone()) {
            Ok(t) => t,
            Err(_) => {
                rec.arg0 = Errno::EINVAL.ret();
                return Ok(());
            }
        };
        let mut parts = text.split('\n').filter(|s| !s.is_empty());
        let cmd = match parts.next() {
            Some(c) => c.to_string(),
            None => {
                rec.arg0 = Errno::EINVAL.ret();
                return Ok(());
            }
        };
        let args: Vec<String> = parts.map(str::to_string).collect();

        match self.spawn_program(&cmd, args, Some(proc)) {
            Ok(child) => rec.arg0 = child.pid.as_i32(),
            Err(e) => rec.arg0 = kernel_errno(&e).ret(),
        }
        Ok(())
    }

    // ── Garbler-sync descriptor calls ──────────────────────────────────

    fn sys_open(
        &self,
        proc: &Process,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        if !self.role.is_garbler() {
            let id = chan.recv_i32()?;
            if id >= 0 {
                proc.fds.lock().insert_at(id, Fd::new(FdKind::Null));
            }
            rec.arg0 = id;
            rec.arg_buf.clear();
            return Ok(());
        }

        let path_str = match String::from_utf8(rec.arg_buf.clone()) {
            Ok(s) => s,
            Err(_) => {
                chan.send_i32(Errno::EINVAL.ret())?;
                chan.flush()?;
                rec.arg0 = Errno::EINVAL.ret();
                rec.arg_buf.clear();
                return Ok(());
            }
        };
        let host = {
            let chroot = proc.chroot.lock().clone();
            let cwd = proc.cwd.lock().clone();
            path::resolve(&self.params.fs_root, &chroot, &cwd, &path_str)
        };
        match std::fs::File::open(&host) {
            Err(e) => {
                let errno = Errno::from_io(&e);
                chan.send_i32(errno.ret())?;
                chan.flush()?;
                rec.arg0 = errno.ret();
                rec.arg_buf.clear();
            }
            Ok(mut file) => match file_info(&mut file) {
                Err(e) => {
                    let errno = Errno::from_io(&e);
                    chan.send_i32(errno.ret())?;
                    chan.flush()?;
                    rec.arg0 = errno.ret();
                    rec.arg_buf.clear();
                }
                Ok(info) => {
                    let id = proc.fds.lock().alloc(Fd::new(FdKind::File(file)));
                    chan.send_i32(id)?;
                    chan.flush()?;
                    rec.arg0 = id;
                    rec.arg_buf = info;
                }
            },
        }
        Ok(())
    }

    fn sys_dial(
        &self,
        proc: &Process,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        if !self.role.is_garbler() {
            let id = chan.recv_i32()?;
            if id >= 0 {
                proc.fds.lock().insert_at(id, Fd::new(FdKind::Null));
            }
            rec.arg0 = 0;
            return Ok(());
        }

        match parse_net_addr(&rec.arg_buf) {
            Err(errno) => {
                chan.send_i32(errno.ret())?;
                chan.flush()?;
                rec.arg0 = errno.ret();
            }
            Ok(addr) => match TcpStream::connect(addr) {
                Err(e) => {
                    let errno = Errno::from_io(&e);
                    chan.send_i32(errno.ret())?;
                    chan.flush()?;
                    rec.arg0 = errno.ret();
                }
                Ok(stream) => {
                    let id = proc.fds.lock().alloc(Fd::new(FdKind::Socket(stream)));
                    chan.send_i32(id)?;
                    chan.flush()?;
                    rec.arg0 = id;
                }
            },
        }
        Ok(())
    }

    fn sys_listen(
        &self,
        proc: &Process,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        if !self.role.is_garbler() {
            let id = chan.recv_i32()?;
            if id >= 0 {
                proc.fds.lock().insert_at(id, Fd::new(FdKind::Null));
            }
            rec.arg0 = 0;
            return Ok(());
        }

        match parse_net_addr(&rec.arg_buf) {
            Err(errno) => {
                chan.send_i32(errno.ret())?;
                chan.flush()?;
                rec.arg0 = errno.ret();
            }
            Ok(addr) => match TcpListener::bind(addr) {
                Err(e) => {
                    let errno = Errno::from_io(&e);
                    chan.send_i32(errno.ret())?;
                    chan.flush()?;
                    rec.arg0 = errno.ret();
                }
                Ok(listener) => {
                    let id = proc.fds.lock().alloc(Fd::new(FdKind::Listener(listener)));
                    chan.send_i32(id)?;
                    chan.flush()?;
                    rec.arg0 = id;
                }
            },
        }
        Ok(())
    }

    fn sys_accept(
        &self,
        proc: &Process,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        if !self.role.is_garbler() {
            let id = chan.recv_i32()?;
            if id >= 0 {
                proc.fds.lock().insert_at(id, Fd::new(FdKind::Null));
            }
            rec.arg0 = id;
            return Ok(());
        }

        let fd = proc.fds.lock().get(rec.arg0);
        let result = match fd {
            None => Err(Errno::EBADF),
            Some(fd) => fd.accept(),
        };
        match result {
            Err(errno) => {
                chan.send_i32(errno.ret())?;
                chan.flush()?;
                rec.arg0 = errno.ret();
            }
            Ok(stream) => {
                let id = proc.fds.lock().alloc(Fd::new(FdKind::Socket(stream)));
                chan.send_i32(id)?;
                chan.flush()?;
                rec.arg0 = id;
            }
        }
        Ok(())
    }

    fn sys_openkey(
        &self,
        proc: &Process,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        let name = match String::from_utf8(rec.arg_buf.clone()) {
            Ok(s) => s,
            Err(_) => {
                if self.role.is_garbler() {
                    chan.send_i32(Errno::EINVAL.ret())?;
                    chan.flush()?;
                } else {
                    let _ = chan.recv_i32()?;
                }
                rec.arg0 = Errno::EINVAL.ret();
                return Ok(());
            }
        };
        let own = vault::open_key(&self.params.vault_prefix, self.role, &name);

        if self.role.is_garbler() {
            match own {
                Err(e) => {
                    let errno = Errno::from_io(&e);
                    chan.send_i32(errno.ret())?;
                    chan.flush()?;
                    rec.arg0 = errno.ret();
                }
                Ok(reader) => {
                    let id = proc.fds.lock().alloc(Fd::new(FdKind::Key(reader)));
                    chan.send_i32(id)?;
                    chan.flush()?;
                    rec.arg0 = id;
                }
            }
        } else {
            let id = chan.recv_i32()?;
            if id < 0 {
                rec.arg0 = id;
            } else {
                match own {
                    Ok(reader) => {
                        proc.fds.lock().insert_at(id, Fd::new(FdKind::Key(reader)));
                        rec.arg0 = id;
                    }
                    Err(e) => {
                        proc.fds.lock().insert_at(id, Fd::new(FdKind::Null));
                        rec.arg0 = Errno::from_io(&e).ret();
                    }
                }
            }
        }
        rec.arg_buf.clear();
        Ok(())
    }

    fn sys_getport(
        &self,
        proc: &Arc<Process>,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        let wanted = Pid::from_u32(rec.arg0 as u32);
        let lookup = || {
            self.procs
                .lock()
                .values()
                .find(|p| p.pid.half(self.role) == wanted.half(self.role))
                .cloned()
                .map(|t| {
                    let server = t.pid == proc.pid;
                    t.port_endpoint(server)
                })
        };

        if self.role.is_garbler() {
            match lookup() {
                None => {
                    chan.send_i32(Errno::ENOENT.ret())?;
                    chan.flush()?;
                    rec.arg0 = Errno::ENOENT.ret();
                }
                Some(ep) => {
                    let id = proc.fds.lock().alloc(Fd::new(FdKind::Port(ep)));
                    chan.send_i32(id)?;
                    chan.flush()?;
                    rec.arg0 = id;
                }
            }
        } else {
            // Sync first: the garbler's id only arrives after its own
            // lookup succeeded, and by then the mirrored target is
            // registered here too.
            let id = chan.recv_i32()?;
            if id < 0 {
                rec.arg0 = id;
            } else {
                match lookup() {
                    Some(ep) => {
                        proc.fds.lock().insert_at(id, Fd::new(FdKind::Port(ep)));
                        rec.arg0 = id;
                    }
                    None => rec.arg0 = Errno::ENOENT.ret(),
                }
            }
        }
        Ok(())
    }

    fn sys_sendfd(&self, proc: &Process, rec: &mut SyscallRecord) {
        let (port_fd, target) = {
            let fds = proc.fds.lock();
            (fds.get(rec.arg0), fds.get(rec.arg1))
        };
        let target = match target {
            Some(t) => t,
            None => {
                rec.arg0 = Errno::EBADF.ret();
                return;
            }
        };
        rec.arg0 = match port_fd {
            None => Errno::EBADF.ret(),
            Some(fd) => match with_port(&fd, |p| p.send_fd(target.copy())) {
                Ok(ret) => ret,
                Err(errno) => errno.ret(),
            },
        };
    }

    fn sys_recvfd(
        &self,
        proc: &Process,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        let port_fd = proc.fds.lock().get(rec.arg0);
        let received = match port_fd {
            None => Err(Errno::EBADF),
            Some(fd) => match with_port(&fd, |p| p.recv_fd()) {
                Ok(inner) => inner,
                Err(errno) => Err(errno),
            },
        };

        if self.role.is_garbler() {
            match received {
                Err(errno) => {
                    chan.send_i32(errno.ret())?;
                    chan.flush()?;
                    rec.arg0 = errno.ret();
                }
                Ok(fd) => {
                    let id = proc.fds.lock().alloc(fd);
                    chan.send_i32(id)?;
                    chan.flush()?;
                    rec.arg0 = id;
                }
            }
        } else {
            let id = chan.recv_i32()?;
            match (id, received) {
                (id, Ok(fd)) if id >= 0 => {
                    proc.fds.lock().insert_at(id, fd);
                    rec.arg0 = id;
                }
                (id, Ok(fd)) => {
                    // The garbler failed; drop our copy so refcounts agree.
                    fd.close();
                    rec.arg0 = id;
                }
                (id, Err(errno)) => {
                    rec.arg0 = if id < 0 { id } else { errno.ret() };
                }
            }
        }
        Ok(())
    }

    fn sys_createmsg(&self, proc: &Process, rec: &mut SyscallRecord) -> Result<(), KernelError> {
        let fd = proc.fds.lock().get(rec.arg0);
        let env = match fd {
            None => Err(Errno::EBADF),
            Some(fd) => match with_port(&fd, |p| p.create_msg()) {
                Ok(inner) => inner,
                Err(errno) => Err(errno),
            },
        };
        match env {
            Ok(env) => {
                rec.arg0 = env.len() as i32;
                rec.arg_buf = env;
            }
            Err(Errno::ERANGE) => {
                // Nonce overflow is fatal, not a recoverable errno.
                return Err(KernelError::Protocol("port nonce overflow".to_string()));
            }
            Err(errno) => {
                rec.arg0 = errno.ret();
                rec.arg_buf.clear();
            }
        }
        Ok(())
    }

    // ── TLS ────────────────────────────────────────────────────────────

    fn tls_settings(&self) -> Result<&TlsSettings, Errno> {
        self.tls.as_ref().ok_or(Errno::EOPNOTSUPP)
    }

    fn sys_tlsserver(
        &self,
        proc: &Process,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        if self.role.is_garbler() {
            self.tlsserver_garbler(proc, rec, chan)
        } else {
            self.tlsserver_evaluator(proc, rec, chan)
        }
    }

    /// Garbler: physical handshake through the ServerHello key-share
    /// decision point, the cross-peer KEX dance, and the SPDZ point
    /// addition producing the shared-secret shares.
    fn tlsserver_garbler(
        &self,
        proc: &Process,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        // The evaluator blocks on the KEX message; every early failure
        // must still send a control message so both sides agree.
        let settings = match self.tls_settings() {
            Ok(s) => s,
            Err(errno) => {
                send_control(
                    chan,
                    &ControlMsg::Error(TlsErrorMsg {
                        errno: errno.code(),
                        message: "tls not configured".to_string(),
                    }),
                )?;
                rec.arg0 = errno.ret();
                return Ok(());
            }
        };
        let config = ServerConfig {
            cert_der: settings.cert_der.clone(),
            suite: settings.suite,
        };

        let sock = proc.fds.lock().get(rec.arg0);
        let stream = match sock {
            None => Err(Errno::EBADF),
            Some(fd) => fd
                .with(|k| match k {
                    FdKind::Socket(s) => s.try_clone().map_err(|e| Errno::from_io(&e)),
                    _ => Err(Errno::ENOTSOCK),
                })
                .and_then(|inner| inner),
        };
        let stream = match stream {
            Ok(s) => s,
            Err(errno) => {
                send_control(
                    chan,
                    &ControlMsg::Error(TlsErrorMsg {
                        errno: errno.code(),
                        message: "tlsserver needs a socket".to_string(),
                    }),
                )?;
                rec.arg0 = errno.ret();
                return Ok(());
            }
        };

        let mut conn = ServerConnection::new(stream, config);
        let kex = match conn.read_client_kex() {
            Ok(k) => k,
            Err(e) => {
                let errno = tls_errno(&e);
                send_control(
                    chan,
                    &ControlMsg::Error(TlsErrorMsg {
                        errno: errno.code(),
                        message: e.to_string(),
                    }),
                )?;
                rec.arg0 = errno.ret();
                return Ok(());
            }
        };

        send_control(
            chan,
            &ControlMsg::Kex(TlsKex {
                client_kex: kex.hello_msg.clone(),
            }),
        )?;
        let result = match recv_control(chan)? {
            ControlMsg::KexResult(r) => r,
            ControlMsg::Error(e) => {
                rec.arg0 = -e.errno.abs();
                return Ok(());
            }
            ControlMsg::Kex(_) => {
                return Err(KernelError::Protocol("unexpected KEX from evaluator".to_string()))
            }
        };

        // Validate everything before the SPDZ traffic starts; the proceed
        // status keeps the two sides' channel schedules aligned.
        let dh_peer = dh::DhPeer::generate("garbler");
        let my_public = dh_peer.public_bytes();
        let prepared = dh::combine(&[my_public.as_slice(), result.public.as_slice()])
            .and_then(|combined| {
                let partial = dh_peer.partial(&kex.p256_share)?;
                let coords = dh::point_coords(&partial)?;
                Ok((combined, coords))
            });
        let (combined, (px, py)) = match prepared {
            Ok(v) => v,
            Err(e) => {
                let _ = conn.abort(eph_tls::AlertDesc::IllegalParameter);
                chan.send_i32(Errno::EINVAL.ret())?;
                chan.flush()?;
                self.trace.warn(&format!("{} tls kex: {}", proc.pid, e));
                rec.arg0 = Errno::EINVAL.ret();
                return Ok(());
            }
        };
        chan.send_i32(0)?;
        chan.flush()?;

        let mut rng = rand::thread_rng();
        let supply = triple::exchange(self.role, chan, self.params.triple_budget, &mut rng)?;
        let (x_share, secret) = {
            let mut sess = Session::new(self.role, chan, supply);
            let x1 = sess.input_owned(&px, &mut rng)?;
            let y1 = sess.input_owned(&py, &mut rng)?;
            let x2 = sess.input_peer()?;
            let y2 = sess.input_peer()?;
            let (x3, _y3) = sess.point_add((&x1, &y1), (&x2, &y2))?;
            let opened = sess.open(&x3)?;
            (field::to_bytes32(&x3), field::to_bytes32(&opened))
        };

        if let Err(e) = conn.send_server_hello(&combined, &secret) {
            let errno = tls_errno(&e);
            chan.send_i32(errno.ret())?;
            chan.flush()?;
            rec.arg0 = errno.ret();
            return Ok(());
        }

        let transcript = conn.transcript_raw().to_vec();
        let fd = Fd::new(FdKind::Tls(Box::new(TlsFd::new(TlsConn::Live(conn)))));
        let id = proc.fds.lock().alloc(fd);
        chan.send_i32(id)?;
        chan.send_bytes(&transcript)?;
        chan.flush()?;

        rec.arg0 = id;
        rec.arg_buf = [&x_share[..], &transcript[..]].concat();
        Ok(())
    }

    /// Evaluator: contribute the DH share and the SPDZ half, then mirror
    /// the TLS descriptor over a null transport.
    fn tlsserver_evaluator(
        &self,
        proc: &Process,
        rec: &mut SyscallRecord,
        chan: &mut PeerChannel,
    ) -> Result<(), KernelError> {
        let kex = match recv_control(chan)? {
            ControlMsg::Kex(k) => k,
            ControlMsg::Error(e) => {
                rec.arg0 = -e.errno.abs();
                return Ok(());
            }
            ControlMsg::KexResult(_) => {
                return Err(KernelError::Protocol("unexpected KEXResult from garbler".to_string()))
            }
        };
        let settings = match self.tls_settings() {
            Ok(s) => s,
            Err(errno) => {
                send_control(
                    chan,
                    &ControlMsg::Error(TlsErrorMsg {
                        errno: errno.code(),
                        message: "tls not configured".to_string(),
                    }),
                )?;
                rec.arg0 = errno.ret();
                return Ok(());
            }
        };
        let config = ServerConfig {
            cert_der: settings.cert_der.clone(),
            suite: settings.suite,
        };

        let share = eph_tls::hs::parse_client_hello(&kex.client_kex)
            .ok()
            .and_then(|h| h.key_share_for(GROUP_SECP256R1).map(|s| s.to_vec()));
        let share = match share {
            Some(s) => s,
            None => {
                send_control(
                    chan,
                    &ControlMsg::Error(TlsErrorMsg {
                        errno: Errno::EINVAL.code(),
                        message: "client hello has no p256 share".to_string(),
                    }),
                )?;
                rec.arg0 = Errno::EINVAL.ret();
                return Ok(());
            }
        };

        let dh_peer = dh::DhPeer::generate("evaluator");
        let partial = match dh_peer.partial(&share) {
            Ok(p) => p,
            Err(e) => {
                send_control(
                    chan,
                    &ControlMsg::Error(TlsErrorMsg {
                        errno: Errno::EINVAL.code(),
                        message: e.to_string(),
                    }),
                )?;
                rec.arg0 = Errno::EINVAL.ret();
                return Ok(());
            }
        };
        let (px, py) = dh::point_coords(&partial).map_err(KernelError::Spdz)?;

        send_control(
            chan,
            &ControlMsg::KexResult(TlsKexResult {
                public: dh_peer.public_bytes(),
                partial: dh::encode_point(&partial),
            }),
        )?;

        let status = chan.recv_i32()?;
        if status < 0 {
            rec.arg0 = status;
            return Ok(());
        }

        let mut rng = rand::thread_rng();
        let supply = triple::exchange(self.role, chan, self.params.triple_budget, &mut rng)?;
        let (x_share, secret) = {
            let mut sess = Session::new(self.role, chan, supply);
            let x1 = sess.input_peer()?;
            let y1 = sess.input_peer()?;
            let x2 = sess.input_owned(&px, &mut rng)?;
            let y2 = sess.input_owned(&py, &mut rng)?;
            let (x3, _y3) = sess.point_add((&x1, &y1), (&x2, &y2))?;
            let opened = sess.open(&x3)?;
            (field::to_bytes32(&x3), field::to_bytes32(&opened))
        };

        let id = chan.recv_i32()?;
        if id < 0 {
            rec.arg0 = id;
            rec.arg_buf.clear();
            return Ok(());
        }
        let transcript = chan.recv_bytes()?;
        let conn = ServerConnection::mirror(config, transcript.clone(), &secret);
        proc.fds.lock().insert_at(
            id,
            Fd::new(FdKind::Tls(Box::new(TlsFd::new(TlsConn::Mirror(conn))))),
        );
        rec.arg0 = id;
        rec.arg_buf = [&x_share[..], &transcript[..]].concat();
        Ok(())
    }

    /// Continue the handshake one message at a time. `arg1` is the
    /// handshake type; `ht = 0` with a non-empty buffer writes an
    /// already-encrypted record (`u16 len ∥ record ∥ transcript tail`).
    fn sys_tlshs(&self, proc: &Process, rec: &mut SyscallRecord) {
        let signer = match self.tls_settings() {
            Ok(s) => Arc::clone(&s.signer),
            Err(errno) => {
                rec.arg0 = errno.ret();
                return;
            }
        };
        let ht = rec.arg1 as u8;
        let data = rec.arg_buf.clone();
        let fd = proc.fds.lock().get(rec.arg0);
        let result = match fd {
            None => Err(Errno::EBADF),
            Some(fd) => fd
                .with(|k| match k {
                    FdKind::Tls(t) => {
                        if ht == 0 && !data.is_empty() {
                            if data.len() < 2 {
                                return Err(Errno::EINVAL);
                            }
                            let rlen = u16::from_be_bytes([data[0], data[1]]) as usize;
                            if 2 + rlen > data.len() {
                                return Err(Errno::EINVAL);
                            }
                            t.conn
                                .write_premade(&data[2..2 + rlen], &data[2 + rlen..])
                                .map(|_| Vec::new())
                                .map_err(|e| tls_errno(&e))
                        } else {
                            t.conn
                                .next_handshake(ht, &data, signer.as_ref())
                                .map_err(|e| tls_errno(&e))
                        }
                    }
                    _ => Err(Errno::EINVAL),
                })
                .and_then(|inner| inner),
        };
        match result {
            Ok(plaintext) => {
                rec.arg0 = 0;
                rec.arg_buf = plaintext;
            }
            Err(errno) => {
                rec.arg0 = errno.ret();
                rec.arg_buf.clear();
            }
        }
    }

    /// Mark the handshake complete: the garbler consumes and verifies the
    /// client Finished; both sides switch to application keys.
    fn sys_tlsstatus(&self, proc: &Process, rec: &mut SyscallRecord) {
        let fd = proc.fds.lock().get(rec.arg0);
        let result = match fd {
            None => Err(Errno::EBADF),
            Some(fd) => fd
                .with(|k| match k {
                    FdKind::Tls(t) => t.conn.finish().map_err(|e| tls_errno(&e)),
                    _ => Err(Errno::EINVAL),
                })
                .and_then(|inner| inner),
        };
        rec.arg0 = match result {
            Ok(()) => 0,
            Err(errno) => errno.ret(),
        };
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

fn with_port<R>(fd: &Fd, f: impl FnOnce(&PortEndpoint) -> R) -> Result<R, Errno> {
    fd.with(|k| match k {
        FdKind::Port(p) => Ok(f(p)),
        _ => Err(Errno::EINVAL),
    })?
}

fn send_control(chan: &mut PeerChannel, msg: &ControlMsg) -> Result<(), KernelError> {
    chan.send_bytes(&msg.encode())?;
    chan.flush()?;
    Ok(())
}

fn recv_control(chan: &mut PeerChannel) -> Result<ControlMsg, KernelError> {
    let raw = chan.recv_bytes()?;
    ControlMsg::decode(&raw).map_err(|e| KernelError::Protocol(e.to_string()))
}

fn tls_errno(e: &TlsError) -> Errno {
    let code = e.errno();
    if code == 0 {
        Errno::ECONNRESET
    } else {
        Errno::from_code(code)
    }
}

fn kernel_errno(e: &KernelError) -> Errno {
    match e {
        KernelError::Io(io) => Errno::from_io(io),
        KernelError::Load(_) => Errno::ENOENT,
        _ => Errno::EIO,
    }
}

/// `"net:addr"`, e.g. `"tcp:127.0.0.1:8080"`. Only TCP is supported.
fn parse_net_addr(buf: &[u8]) -> Result<String, Errno> {
    let s = std::str::from_utf8(buf).map_err(|_| Errno::EINVAL)?;
    let (net, addr) = s.split_once(':').ok_or(Errno::EINVAL)?;
    if net != "tcp" {
        return Err(Errno::EOPNOTSUPP);
    }
    if addr.is_empty() {
        return Err(Errno::EINVAL);
    }
    Ok(addr.to_string())
}

/// Serialized file info returned by `Open`: `u64 size ∥ u64 mtime ∥
/// u8 enc-flag [∥ encrypted-header fields]`.
fn file_info(file: &mut std::fs::File) -> std::io::Result<Vec<u8>> {
    let meta = file.metadata()?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut out = Vec::with_capacity(17 + 24);
    out.extend_from_slice(&meta.len().to_be_bytes());
    out.extend_from_slice(&mtime.to_be_bytes());

    let mut head = [0u8; HEADER_LEN];
    let mut got = 0;
    while got < HEADER_LEN {
        let n = file.read(&mut head[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    file.seek(SeekFrom::Start(0))?;

    match EncHeader::parse(&head[..got]) {
        Some(h) => {
            out.push(1);
            out.extend_from_slice(&h.block_size.to_be_bytes());
            out.push(h.algo);
            out.push(h.flags);
            out.extend_from_slice(&h.plain_size.to_be_bytes());
            out.extend_from_slice(&h.nonce);
        }
        None => out.push(0),
    }
    Ok(out)
}

// ── Connectors ─────────────────────────────────────────────────────────

/// Pairs two kernels living in one address space: each `connect` creates a
/// duplex pipe and hands the far end to the bound evaluator kernel's
/// acceptor on a fresh thread.
pub struct LocalConnector {
    peer: Mutex<Weak<Kernel>>,
}

impl LocalConnector {
    pub fn new() -> Arc<LocalConnector> {
        Arc::new(LocalConnector {
            peer: Mutex::new(Weak::new()),
        })
    }

    pub fn bind(&self, peer: &Arc<Kernel>) {
        *self.peer.lock() = Arc::downgrade(peer);
    }
}

impl PeerConnector for LocalConnector {
    fn connect(&self) -> Result<PeerStream, KernelError> {
        let peer = self
            .peer
            .lock()
            .upgrade()
            .ok_or_else(|| KernelError::Protocol("no peer kernel bound".to_string()))?;
        let (near, far) = duplex_pair();
        std::thread::spawn(move || {
            if let Err(e) = peer.serve_peer(PeerStream::Mem(far)) {
                eprintln!("[eph:e] accept failed: {}", e);
            }
        });
        Ok(PeerStream::Mem(near))
    }
}

impl PeerConnector for Arc<LocalConnector> {
    fn connect(&self) -> Result<PeerStream, KernelError> {
        (**self).connect()
    }
}

/// For kernels that never originate processes (a plain evaluator).
pub struct NoConnector;

impl PeerConnector for NoConnector {
    fn connect(&self) -> Result<PeerStream, KernelError> {
        Err(KernelError::Protocol(
            "kernel has no peer connector".to_string(),
        ))
    }
}
