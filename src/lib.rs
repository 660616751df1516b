//! Raw packet sockets for unprivileged processes.
//!
//! Creating an `AF_PACKET` socket on Linux needs `CAP_NET_RAW`, which most
//! programs should not carry. This crate splits the work in two: the
//! library half runs with the caller's ordinary identity, while a small
//! separately installed executable, `rawsocket-helper`, carries the
//! elevation, creates exactly one socket per invocation, and hands the
//! descriptor back over a Unix socketpair before exiting.
//!
//! ```no_run
//! use rawsocket::{Protocol, SocketRequest};
//!
//! let request = SocketRequest::new("eth0").protocol(Protocol::All);
//! let fd = rawsocket::rawsocket_fd(&request)?;
//! # drop(fd);
//! # Ok::<(), rawsocket::AcquireError>(())
//! ```
//!
//! Installing the helper (as root):
//!
//! ```text
//! install -m 750 -g yourgroup rawsocket-helper /usr/local/bin/
//! setcap cap_net_raw+ep /usr/local/bin/rawsocket-helper
//! ```
//!
//! A setuid-root install works too; the helper sheds the uid right after
//! the one syscall that needs it.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod client;
        mod error;
        pub mod helper;
        mod ipc;
        mod packet;
        mod privilege;
        mod request;
        mod wire;

        pub use client::{HelperClient, HELPER_ENV, HELPER_PROGRAM};
        pub use error::AcquireError;
        pub use request::{Protocol, SocketRequest};

        use std::os::fd::OwnedFd;

        /// Acquire one raw socket with default client settings.
        ///
        /// Convenience over [`HelperClient::new`] for the common case of a
        /// helper on `PATH` and the default timeout.
        pub fn rawsocket_fd(request: &SocketRequest) -> Result<OwnedFd, AcquireError> {
            HelperClient::new().acquire(request)
        }
    } else {
        compile_error!("rawsocket requires Linux (AF_PACKET raw sockets)");
    }
}
