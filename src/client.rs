//! The unprivileged half: spawn the installed helper and drive one
//! request/response exchange over a fresh channel.

use crate::error::AcquireError;
use crate::ipc::{self, ClientEnd, Message};
use crate::request::SocketRequest;
use crate::wire;
use nix::errno::Errno;
use std::env;
use std::ffi::OsString;
use std::os::fd::{OwnedFd, RawFd};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

/// Name the installed helper is resolved by on `PATH`.
pub const HELPER_PROGRAM: &str = "rawsocket-helper";

/// Environment variable overriding the helper program path.
pub const HELPER_ENV: &str = "RAWSOCKET_HELPER";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of the acquisition protocol.
///
/// Each [`acquire`](Self::acquire) call spawns a fresh helper over a fresh
/// channel, so a `HelperClient` is stateless and fine to share across
/// threads; concurrent acquisitions do not interfere.
#[derive(Debug, Clone)]
pub struct HelperClient {
    program: OsString,
    timeout: Duration,
}

impl Default for HelperClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HelperClient {
    /// Resolve the helper by its well-known name, honoring the
    /// [`HELPER_ENV`] override.
    pub fn new() -> Self {
        let program = env::var_os(HELPER_ENV).unwrap_or_else(|| HELPER_PROGRAM.into());
        Self {
            program,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use an explicit helper program instead of `PATH` resolution.
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound the wait for the helper's response. Zero disables the bound.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Acquire one raw socket descriptor.
    ///
    /// Blocks until the helper delivers a descriptor or a failure reason,
    /// or until the timeout elapses. The returned descriptor is open,
    /// CLOEXEC, and usable with ordinary unprivileged syscalls; the helper
    /// has already exited by the time this returns.
    pub fn acquire(&self, request: &SocketRequest) -> Result<OwnedFd, AcquireError> {
        // Names the wire cannot even represent never reach the helper.
        let payload = wire::encode_request(request)
            .map_err(|err| AcquireError::InvalidInterface(err.to_string()))?;

        let (client_end, helper_end) = ipc::channel().map_err(Self::setup_failed)?;
        client_end
            .set_recv_timeout(self.timeout)
            .map_err(Self::setup_failed)?;

        // The receiving end is armed before the helper exists, so even a
        // helper that answers instantly has somewhere to deliver to.
        let channel_fd = helper_end.inherit_for_spawn().map_err(Self::setup_failed)?;
        let mut child = self.spawn(channel_fd)?;
        // The child holds its own copy now; ours must close so helper
        // death shows up as end-of-file rather than a silent hang.
        drop(helper_end);

        debug!(program = ?self.program, pid = child.id(), "helper spawned");

        if let Err(errno) = client_end.send(&payload) {
            // A broken pipe here means the helper was gone before the
            // request ever reached it.
            return Err(Self::crashed(&mut child, format!("request send failed: {errno}")));
        }

        self.wait_for_outcome(client_end, child)
    }

    fn spawn(&self, channel_fd: RawFd) -> Result<Child, AcquireError> {
        let mut command = Command::new(&self.program);
        command
            .arg(channel_fd.to_string())
            .stdin(Stdio::null())
            .env_clear();
        // The helper gets a scrubbed environment; only PATH passes
        // through, matching how it was resolved.
        if let Some(path) = env::var_os("PATH") {
            command.env("PATH", path);
        }

        command
            .spawn()
            .map_err(|err| AcquireError::HelperUnavailable(format!("{:?}: {err}", self.program)))
    }

    fn wait_for_outcome(
        &self,
        client_end: ClientEnd,
        mut child: Child,
    ) -> Result<OwnedFd, AcquireError> {
        let message = match client_end.recv_response() {
            Ok(Some(message)) => message,
            Ok(None) => {
                return Err(Self::crashed(
                    &mut child,
                    "helper closed the channel without responding".to_owned(),
                ))
            }
            Err(Errno::EAGAIN) => {
                warn!(timeout = ?self.timeout, "helper unresponsive, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(AcquireError::Timeout(self.timeout));
            }
            Err(errno) => {
                return Err(Self::crashed(
                    &mut child,
                    format!("channel receive failed: {errno}"),
                ))
            }
        };

        let Message { payload, fd } = message;
        match wire::decode_response(&payload) {
            Ok(None) => match fd {
                Some(fd) => {
                    Self::reap(&mut child);
                    Ok(fd)
                }
                // A success status with no descriptor attached breaks the
                // protocol's atomicity promise; treat the helper as broken.
                None => Err(Self::crashed(
                    &mut child,
                    "success response carried no descriptor".to_owned(),
                )),
            },
            Ok(Some(failure)) => {
                Self::reap(&mut child);
                // Failures never legitimately carry a descriptor.
                drop(fd);
                Err(failure.into())
            }
            Err(err) => Err(Self::crashed(&mut child, format!("malformed response: {err}"))),
        }
    }

    fn setup_failed(errno: Errno) -> AcquireError {
        AcquireError::HelperUnavailable(format!("channel setup failed: {errno}"))
    }

    fn reap(child: &mut Child) {
        match child.wait() {
            Ok(status) => debug!(%status, "helper exited"),
            Err(err) => warn!("failed to reap helper: {err}"),
        }
    }

    fn crashed(child: &mut Child, detail: String) -> AcquireError {
        let _ = child.kill();
        match child.wait() {
            Ok(status) => AcquireError::HelperCrashed(format!("{detail} ({status})")),
            Err(_) => AcquireError::HelperCrashed(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Instant;

    // A stand-in helper for the process-level failure paths; none of these
    // need elevation or a real helper binary.
    fn fake_helper(name: &str, script: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("rawsocket-{name}-{}", std::process::id()));
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn missing_helper_is_unavailable() {
        let client = HelperClient::with_program("rawsocket-helper-that-does-not-exist");
        let err = client.acquire(&SocketRequest::new("lo")).unwrap_err();
        assert!(matches!(err, AcquireError::HelperUnavailable(_)), "{err:?}");
    }

    #[test]
    fn helper_dying_without_response_is_a_crash() {
        let path = fake_helper("crash", "#!/bin/sh\nexit 7\n");
        let client = HelperClient::with_program(path.clone());
        let err = client.acquire(&SocketRequest::new("lo")).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, AcquireError::HelperCrashed(_)), "{err:?}");
    }

    #[test]
    fn unresponsive_helper_times_out() {
        let path = fake_helper("hang", "#!/bin/sh\nsleep 30\n");
        let client = HelperClient::with_program(path.clone()).timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = client.acquire(&SocketRequest::new("lo")).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, AcquireError::Timeout(_)), "{err:?}");
        // bounded wait, not the fake helper's 30s
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn unencodable_interface_fails_before_spawn() {
        let client = HelperClient::with_program("rawsocket-helper-that-does-not-exist");
        let err = client.acquire(&SocketRequest::new("x".repeat(300))).unwrap_err();
        assert!(matches!(err, AcquireError::InvalidInterface(_)), "{err:?}");
    }
}
