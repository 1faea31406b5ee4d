//! End-to-end scenarios over a paired garbler/evaluator kernel.
//!
//! Each test stands up both kernels in-process, connected by duplex
//! channels, with closure-backed circuit runners replaying the same state
//! machine on both peers -- the observable contract of a real joint
//! evaluation.

mod common;

use common::*;
use eph_common::{Errno, Pid, Role};
use eph_kernel::fd::{Fd, FdKind};
use eph_kernel::process::Process;
use eph_kernel::program::load_program;
use eph_kernel::syscall::{record_fields, Sys};

// ── Scenario A: empty-program exit ─────────────────────────────────────

#[test]
fn test_empty_program_exit() {
    let tmp = tempfile::tempdir().unwrap();
    write_program(tmp.path(), "exit7", &[("init", 0)]);

    let state_fn = |_role: Role, state: &str, _inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 0, Sys::Exit, 7, None, None)),
        other => Err(format!("unexpected state {}", other)),
    };
    let mut gf = FnFactory::new();
    gf.insert("exit7", state_fn);
    let mut ef = FnFactory::new();
    ef.insert("exit7", state_fn);

    let (gk, ek) = paired_kernels(tmp.path(), tmp.path(), gf, ef, None);
    let proc = gk.spawn_program("exit7", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 7);

    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 7);
}

#[test]
fn test_parent_wait_returns_child_exit() {
    let tmp = tempfile::tempdir().unwrap();
    write_program(tmp.path(), "exit7", &[("init", 0)]);
    write_program(
        tmp.path(),
        "waiter",
        &[("init", 0), ("wait_child", 1), ("finish", 2)],
    );

    let child_fn = |_role: Role, state: &str, _inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 0, Sys::Exit, 7, None, None)),
        other => Err(format!("unexpected state {}", other)),
    };
    // The waiter spawns the child, waits on the (deterministic) child PID
    // and exits 0 only if Wait produced the child's exit value.
    let waiter_fn = move |_role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 1, Sys::Spawn, 0, Some(b"exit7"), None)),
        "StWaitChild" => Ok(record_fields(
            &[],
            2,
            Sys::Wait,
            Pid::new(2, 2).as_i32(),
            None,
            None,
        )),
        "StFinish" => {
            let ok = arg0_of(inputs) == 7;
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("exit7", child_fn);
    gf.insert("waiter", waiter_fn);
    let mut ef = FnFactory::new();
    ef.insert("exit7", child_fn);
    ef.insert("waiter", waiter_fn);

    let (gk, ek) = paired_kernels(tmp.path(), tmp.path(), gf, ef, None);
    let proc = gk.spawn_program("waiter", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 0, "waiter saw its child exit with 7");

    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0);

    // The child was reaped from both tables; only the waiter remains.
    assert_eq!(gk.process_count(), 1);
    assert_eq!(ek.process_count(), 1);
}

// ── Scenario B: write-to-stdout ────────────────────────────────────────

#[test]
fn test_write_to_stdout() {
    let tmp = tempfile::tempdir().unwrap();
    write_program(tmp.path(), "hello", &[("init", 0), ("check", 1)]);

    let hello_fn = |_role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 1, Sys::Write, 1, Some(b"hi\n"), Some(3))),
        "StCheck" => {
            // Garbler wrote to the real fd, the evaluator's null stdout
            // consumed the same count.
            let ok = arg0_of(inputs) == 3;
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("hello", hello_fn);
    let mut ef = FnFactory::new();
    ef.insert("hello", hello_fn);

    let (gk, ek) = paired_kernels(tmp.path(), tmp.path(), gf, ef, None);

    // Observe the garbler's stdout by handing the process a file as fd 1,
    // inherited the way a spawned child inherits its parent's streams.
    let out_path = tmp.path().join("stdout.capture");
    let out_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&out_path)
        .unwrap();
    let template = {
        let prog = load_program(&tmp.path().join("hello")).unwrap();
        let p = Process::new(Role::Garbler, Pid::new(9999, 9999), prog, vec![]);
        p.fds.lock().insert_at(1, Fd::new(FdKind::File(out_file)));
        p
    };

    let proc = gk
        .spawn_program("hello", vec![], Some(&template))
        .unwrap();
    assert_eq!(proc.wait_zombie(), 0);
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0);

    assert_eq!(std::fs::read(&out_path).unwrap(), b"hi\n");
}

// ── Scenario C: port echo between siblings ─────────────────────────────

#[test]
fn test_port_echo_between_siblings() {
    let tmp = tempfile::tempdir().unwrap();
    write_program(
        tmp.path(),
        "porter",
        &[("init", 0), ("get_port", 1), ("send", 2), ("reap", 3), ("done", 4)],
    );
    write_program(
        tmp.path(),
        "portee",
        &[("init", 0), ("read_port", 1), ("check", 2)],
    );

    let child_pid = Pid::new(2, 2);

    // Child: fetch its own mailbox (server side), read one message,
    // verify the key-prefixed payload.
    let portee_fn = move |role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(
            &[],
            1,
            Sys::Getport,
            child_pid.as_i32(),
            None,
            None,
        )),
        "StReadPort" => Ok(record_fields(&[], 2, Sys::Read, 3, Some(&[]), Some(64))),
        "StCheck" => {
            let buf = argbuf_of(role, inputs);
            // Garbler carries the payload after the 16-byte key share; the
            // evaluator observes only the key share.
            let ok = match role {
                Role::Garbler => buf.len() == 19 && &buf[16..] == b"ABC",
                Role::Evaluator => buf.len() == 16,
            };
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    // Parent: spawn the child, get a client endpoint to its mailbox, send
    // "ABC", reap the child.
    let porter_fn = move |_role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 1, Sys::Spawn, 0, Some(b"portee"), None)),
        "StGetPort" => Ok(record_fields(
            &[],
            2,
            Sys::Getport,
            child_pid.as_i32(),
            None,
            None,
        )),
        "StSend" => Ok(record_fields(&[], 3, Sys::Write, 3, Some(b"ABC"), Some(3))),
        "StReap" => Ok(record_fields(
            &[],
            4,
            Sys::Wait,
            child_pid.as_i32(),
            None,
            None,
        )),
        "StDone" => {
            let ok = arg0_of(inputs) == 0;
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("porter", porter_fn);
    gf.insert("portee", portee_fn);
    let mut ef = FnFactory::new();
    ef.insert("porter", porter_fn);
    ef.insert("portee", portee_fn);

    let (gk, ek) = paired_kernels(tmp.path(), tmp.path(), gf, ef, None);
    let proc = gk.spawn_program("porter", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 0, "parent saw child read and exit 0");
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0);
}

// ── Scenario F: file-descriptor mirror ─────────────────────────────────

#[test]
fn test_open_mirrors_fd_ids() {
    let tmp = tempfile::tempdir().unwrap();
    let fs_root = tmp.path().join("fsroot");
    std::fs::create_dir_all(fs_root.join("etc/httpd")).unwrap();
    std::fs::write(fs_root.join("etc/httpd/motd"), b"message of the day").unwrap();

    let progs = tmp.path().join("progs");
    write_program(&progs, "opener", &[("init", 0), ("open", 1), ("check", 2)]);

    let opener_fn = |role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(
            &[],
            1,
            Sys::Chroot,
            0,
            Some(b"/etc/httpd"),
            None,
        )),
        "StOpen" => Ok(record_fields(&[], 2, Sys::Open, 0, Some(b"/motd"), None)),
        "StCheck" => {
            let buf = argbuf_of(role, inputs);
            let ok = match role {
                // Serialized file info: size ∥ mtime ∥ enc-flag(0).
                Role::Garbler => {
                    arg0_of(inputs) == 3
                        && buf.len() == 17
                        && buf[0..8] == 18u64.to_be_bytes()
                        && buf[16] == 0
                }
                Role::Evaluator => arg0_of(inputs) == 3 && buf.is_empty(),
            };
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("opener", opener_fn);
    let mut ef = FnFactory::new();
    ef.insert("opener", opener_fn);

    let (gk, ek) = paired_kernels(&progs, &fs_root, gf, ef, None);
    let proc = gk.spawn_program("opener", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 0);
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0);
}

#[test]
fn test_open_missing_file_same_errno_both_sides() {
    let tmp = tempfile::tempdir().unwrap();
    let fs_root = tmp.path().join("fsroot");
    std::fs::create_dir_all(&fs_root).unwrap();
    let progs = tmp.path().join("progs");
    write_program(&progs, "opener", &[("init", 0), ("check", 1)]);

    let opener_fn = |_role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 1, Sys::Open, 0, Some(b"/no/such/file"), None)),
        "StCheck" => {
            let ok = arg0_of(inputs) == Errno::ENOENT.ret();
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("opener", opener_fn);
    let mut ef = FnFactory::new();
    ef.insert("opener", opener_fn);

    let (gk, ek) = paired_kernels(&progs, &fs_root, gf, ef, None);
    let proc = gk.spawn_program("opener", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 0);
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0);
}

#[test]
fn test_open_reports_encrypted_header() {
    use eph_kernel::encfile::{EncHeader, ALGO_AES_128_GCM};

    let tmp = tempfile::tempdir().unwrap();
    let fs_root = tmp.path().join("fsroot");
    std::fs::create_dir_all(&fs_root).unwrap();
    let header = EncHeader {
        block_size: 4096,
        algo: ALGO_AES_128_GCM,
        flags: 1,
        plain_size: 512,
        nonce: [5; 12],
    };
    let mut contents = header.encode().to_vec();
    contents.extend_from_slice(&[0u8; 32]);
    std::fs::write(fs_root.join("secret"), &contents).unwrap();

    let progs = tmp.path().join("progs");
    write_program(&progs, "opener", &[("init", 0), ("check", 1)]);

    let opener_fn = |role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 1, Sys::Open, 0, Some(b"/secret"), None)),
        "StCheck" => {
            let buf = argbuf_of(role, inputs);
            let ok = match role {
                Role::Garbler => {
                    buf.len() == 41
                        && buf[16] == 1
                        && buf[17..19] == 4096u16.to_be_bytes()
                        && buf[19] == ALGO_AES_128_GCM
                        && buf[20] == 1
                        && buf[21..29] == 512u64.to_be_bytes()
                        && buf[29..41] == [5u8; 12]
                }
                Role::Evaluator => buf.is_empty(),
            };
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("opener", opener_fn);
    let mut ef = FnFactory::new();
    ef.insert("opener", opener_fn);

    let (gk, ek) = paired_kernels(&progs, &fs_root, gf, ef, None);
    let proc = gk.spawn_program("opener", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 0);
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0);
}

// ── Descriptor passing (Sendfd / Recvfd / Createmsg) ───────────────────

#[test]
fn test_sendfd_recvfd_syncs_ids() {
    let tmp = tempfile::tempdir().unwrap();
    write_program(
        tmp.path(),
        "fd_sender",
        &[("init", 0), ("get_port", 1), ("send_fd", 2), ("reap", 3), ("done", 4)],
    );
    write_program(
        tmp.path(),
        "fd_receiver",
        &[("init", 0), ("recv_fd", 1), ("check", 2)],
    );

    let child_pid = Pid::new(2, 2);

    let receiver_fn = move |_role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(
            &[],
            1,
            Sys::Getport,
            child_pid.as_i32(),
            None,
            None,
        )),
        "StRecvFd" => Ok(record_fields(&[], 2, Sys::Recvfd, 3, None, None)),
        "StCheck" => {
            // The received descriptor lands at the next free id on both
            // sides (3 is the port endpoint, so 4).
            let ok = arg0_of(inputs) == 4;
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let sender_fn = move |_role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 1, Sys::Spawn, 0, Some(b"fd_receiver"), None)),
        "StGetPort" => Ok(record_fields(
            &[],
            2,
            Sys::Getport,
            child_pid.as_i32(),
            None,
            None,
        )),
        // Pass our stdout (fd 1) through the port endpoint (fd 3).
        "StSendFd" => Ok(record_fields(&[], 3, Sys::Sendfd, 3, Some(&[]), Some(1))),
        "StReap" => Ok(record_fields(
            &[],
            4,
            Sys::Wait,
            child_pid.as_i32(),
            None,
            None,
        )),
        "StDone" => {
            let ok = arg0_of(inputs) == 0;
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("fd_sender", sender_fn);
    gf.insert("fd_receiver", receiver_fn);
    let mut ef = FnFactory::new();
    ef.insert("fd_sender", sender_fn);
    ef.insert("fd_receiver", receiver_fn);

    let (gk, ek) = paired_kernels(tmp.path(), tmp.path(), gf, ef, None);
    let proc = gk.spawn_program("fd_sender", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 0);
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0);
}

#[test]
fn test_createmsg_envelope_shapes() {
    let tmp = tempfile::tempdir().unwrap();
    write_program(
        tmp.path(),
        "enveloper",
        &[("init", 0), ("msg", 1), ("check", 2)],
    );

    let own_pid = Pid::new(1, 1);
    let env_fn = move |role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(
            &[],
            1,
            Sys::Getport,
            own_pid.as_i32(),
            None,
            None,
        )),
        "StMsg" => Ok(record_fields(&[], 2, Sys::Createmsg, 3, None, None)),
        "StCheck" => {
            let buf = argbuf_of(role, inputs);
            let ok = match role {
                // key ∥ 12-byte nonce, server-direction bit set.
                Role::Garbler => buf.len() == 28 && buf[16] & 0x80 == 0x80,
                // Just the key share.
                Role::Evaluator => buf.len() == 16,
            };
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("enveloper", env_fn);
    let mut ef = FnFactory::new();
    ef.insert("enveloper", env_fn);

    let (gk, ek) = paired_kernels(tmp.path(), tmp.path(), gf, ef, None);
    let proc = gk.spawn_program("enveloper", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 0);
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0);
}

// ── Dynamic circuits ───────────────────────────────────────────────────

#[test]
fn test_dynamic_state_exchanges_input_sizes() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dynrun");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("symtab"), "init 0\n").unwrap();
    std::fs::write(dir.join("init.dmpcl"), "func init(arg0, key) {}").unwrap();

    // The per-state loop exchanges both peers' bit sizes over the channel
    // before invoking the runner; the closure only has to terminate.
    let dyn_fn = |_role: Role, state: &str, _inputs: &[_]| match state {
        "init" => Ok(record_fields(&[], 0, Sys::Exit, 5, None, None)),
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("dynrun", dyn_fn);
    let mut ef = FnFactory::new();
    ef.insert("dynrun", dyn_fn);

    let (gk, ek) = paired_kernels(tmp.path(), tmp.path(), gf, ef, None);
    let proc = gk.spawn_program("dynrun", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 5);
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 5);
}

// ── Yield semantics ────────────────────────────────────────────────────

#[test]
fn test_yield_preserves_inflight_values() {
    let tmp = tempfile::tempdir().unwrap();
    write_program(
        tmp.path(),
        "yielder",
        &[("init", 0), ("pause", 1), ("check", 2)],
    );

    let yielder_fn = |role: Role, state: &str, inputs: &[_]| match state {
        "init" => Ok(record_fields(
            &[],
            1,
            Sys::Getrandom,
            8,
            Some(b"seed"),
            None,
        )),
        // Yield re-enters with the previous in-flight values even though
        // the circuit emitted fresh ones.
        "StPause" => Ok(record_fields(&[], 2, Sys::Yield, -1, Some(b"junk"), Some(-1))),
        "StCheck" => {
            let buf = argbuf_of(role, inputs);
            let ok = arg0_of(inputs) == 8 && buf.len() == 8;
            Ok(record_fields(&[], 0, Sys::Exit, if ok { 0 } else { 1 }, None, None))
        }
        other => Err(format!("unexpected state {}", other)),
    };

    let mut gf = FnFactory::new();
    gf.insert("yielder", yielder_fn);
    let mut ef = FnFactory::new();
    ef.insert("yielder", yielder_fn);

    let (gk, ek) = paired_kernels(tmp.path(), tmp.path(), gf, ef, None);
    let proc = gk.spawn_program("yielder", vec![], None).unwrap();
    assert_eq!(proc.wait_zombie(), 0);
    let mirror = find_proc_retry(&ek, proc.pid);
    assert_eq!(mirror.wait_zombie(), 0);
}
