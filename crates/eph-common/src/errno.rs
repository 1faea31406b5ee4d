//! POSIX-style error numbers.
//!
//! Syscalls surface host errors to the MPC circuit as negative errno values
//! in `arg0`. The set below covers every error the kernel, the FD layer, the
//! port layer and the TLS subsystem can produce. Values follow the Linux
//! numbering where one exists; `EAUTH` keeps its BSD value since Linux has
//! no equivalent.

use std::fmt;
use std::io;

/// Error numbers returned (negated) in the `arg0` slot of a syscall record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Errno {
    EPERM = 1,
    ENOENT = 2,
    EINTR = 4,
    EIO = 5,
    EBADF = 9,
    ECHILD = 10,
    EAGAIN = 11,
    ENOMEM = 12,
    EACCES = 13,
    EFAULT = 14,
    EEXIST = 17,
    ENOTDIR = 20,
    EISDIR = 21,
    EINVAL = 22,
    EMFILE = 24,
    EFBIG = 27,
    ENOSPC = 28,
    EPIPE = 32,
    ERANGE = 34,
    ENOMSG = 42,
    EPROTO = 71,
    EBADMSG = 74,
    EAUTH = 80,
    ENOTSOCK = 88,
    EMSGSIZE = 90,
    EPROTONOSUPPORT = 93,
    EOPNOTSUPP = 95,
    EADDRINUSE = 98,
    EADDRNOTAVAIL = 99,
    ECONNABORTED = 103,
    ECONNRESET = 104,
    ENOTCONN = 107,
    ETIMEDOUT = 110,
    ECONNREFUSED = 111,
    EHOSTUNREACH = 113,
    ECANCELED = 125,
}

impl Errno {
    /// The positive error number.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// The negated value placed in `arg0`.
    pub fn ret(self) -> i32 {
        -(self as i32)
    }

    /// Translate a host I/O error into the closest errno.
    pub fn from_io(err: &io::Error) -> Errno {
        use io::ErrorKind::*;
        match err.kind() {
            NotFound => Errno::ENOENT,
            PermissionDenied => Errno::EACCES,
            ConnectionRefused => Errno::ECONNREFUSED,
            ConnectionReset => Errno::ECONNRESET,
            ConnectionAborted => Errno::ECONNABORTED,
            NotConnected => Errno::ENOTCONN,
            AddrInUse => Errno::EADDRINUSE,
            AddrNotAvailable => Errno::EADDRNOTAVAIL,
            BrokenPipe => Errno::EPIPE,
            AlreadyExists => Errno::EEXIST,
            WouldBlock => Errno::EAGAIN,
            InvalidInput => Errno::EINVAL,
            InvalidData => Errno::EBADMSG,
            TimedOut => Errno::ETIMEDOUT,
            WriteZero => Errno::EPIPE,
            Interrupted => Errno::EINTR,
            UnexpectedEof => Errno::ECONNRESET,
            OutOfMemory => Errno::ENOMEM,
            _ => Errno::EIO,
        }
    }

    /// Recover an errno from a (positive) code, for values synced from the
    /// peer. Unknown codes collapse to `EIO`.
    pub fn from_code(code: i32) -> Errno {
        use Errno::*;
        match code {
            1 => EPERM,
            2 => ENOENT,
            4 => EINTR,
            5 => EIO,
            9 => EBADF,
            10 => ECHILD,
            11 => EAGAIN,
            12 => ENOMEM,
            13 => EACCES,
            14 => EFAULT,
            17 => EEXIST,
            20 => ENOTDIR,
            21 => EISDIR,
            22 => EINVAL,
            24 => EMFILE,
            27 => EFBIG,
            28 => ENOSPC,
            32 => EPIPE,
            34 => ERANGE,
            42 => ENOMSG,
            71 => EPROTO,
            74 => EBADMSG,
            80 => EAUTH,
            88 => ENOTSOCK,
            90 => EMSGSIZE,
            93 => EPROTONOSUPPORT,
            95 => EOPNOTSUPP,
            98 => EADDRINUSE,
            99 => EADDRNOTAVAIL,
            103 => ECONNABORTED,
            104 => ECONNRESET,
            107 => ENOTCONN,
            110 => ETIMEDOUT,
            111 => ECONNREFUSED,
            113 => EHOSTUNREACH,
            125 => ECANCELED,
            _ => EIO,
        }
    }

    fn name(self) -> &'static str {
        use Errno::*;
        match self {
            EPERM => "EPERM",
            ENOENT => "ENOENT",
            EINTR => "EINTR",
            EIO => "EIO",
            EBADF => "EBADF",
            ECHILD => "ECHILD",
            EAGAIN => "EAGAIN",
            ENOMEM => "ENOMEM",
            EACCES => "EACCES",
            EFAULT => "EFAULT",
            EEXIST => "EEXIST",
            ENOTDIR => "ENOTDIR",
            EISDIR => "EISDIR",
            EINVAL => "EINVAL",
            EMFILE => "EMFILE",
            EFBIG => "EFBIG",
            ENOSPC => "ENOSPC",
            EPIPE => "EPIPE",
            ERANGE => "ERANGE",
            ENOMSG => "ENOMSG",
            EPROTO => "EPROTO",
            EBADMSG => "EBADMSG",
            EAUTH => "EAUTH",
            ENOTSOCK => "ENOTSOCK",
            EMSGSIZE => "EMSGSIZE",
            EPROTONOSUPPORT => "EPROTONOSUPPORT",
            EOPNOTSUPP => "EOPNOTSUPP",
            EADDRINUSE => "EADDRINUSE",
            EADDRNOTAVAIL => "EADDRNOTAVAIL",
            ECONNABORTED => "ECONNABORTED",
            ECONNRESET => "ECONNRESET",
            ENOTCONN => "ENOTCONN",
            ETIMEDOUT => "ETIMEDOUT",
            ECONNREFUSED => "ECONNREFUSED",
            EHOSTUNREACH => "EHOSTUNREACH",
            ECANCELED => "ECANCELED",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
