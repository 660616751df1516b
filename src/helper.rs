//! The privileged half: serve exactly one acquisition request, then exit.
//!
//! Strictly linear: read request, validate, create, drop privileges, hand
//! the descriptor off. There is no loop: a second request needs a second
//! helper process, which keeps the privileged code free of cross-request
//! state.

use crate::ipc::HelperChannel;
use crate::packet;
use crate::privilege;
use crate::request::Protocol;
use crate::wire::{self, Failure, FailureCode, RequestRecord, WireError};
use eyre::{eyre, WrapErr};
use nix::net::if_::if_nametoindex;
use std::io;
use std::os::fd::{AsFd, OwnedFd, RawFd};
use tracing::{debug, info, warn};

/// IFNAMSIZ minus the trailing NUL.
const MAX_IFACE_LEN: usize = (libc::IFNAMSIZ - 1) as usize;

/// Entry point for the helper binary: wrap the channel fd inherited from
/// the client and run the single exchange.
pub fn serve_fd(channel_fd: RawFd) -> eyre::Result<()> {
    let channel = unsafe { HelperChannel::from_raw_fd(channel_fd) };
    serve(channel)
}

fn serve(channel: HelperChannel) -> eyre::Result<()> {
    // Probe before restricting: the answer feeds the PermissionDenied
    // report later.
    let privileged = privilege::have_net_raw();
    privilege::retain_net_raw_only()?;

    let payload = channel
        .recv_request()
        .wrap_err("failed to read request from channel")?;
    let record = match wire::decode_request(&payload) {
        Ok(record) => record,
        // A garbled name is still coherently reportable; any other decode
        // failure means the peer is not speaking our protocol at all.
        Err(WireError::NotUtf8) => {
            let failure = Failure::new(
                FailureCode::InvalidInterface,
                "interface name is not valid UTF-8",
            );
            return refuse(channel, failure);
        }
        Err(err) => return Err(eyre!("malformed request record: {err}")),
    };

    debug!(
        interface = %record.interface,
        protocol = record.protocol,
        promiscuous = record.promiscuous,
        "request received"
    );

    match create_socket(&record, privileged) {
        Ok(socket) => deliver(channel, socket),
        Err(failure) => refuse(channel, failure),
    }
}

fn deliver(channel: HelperChannel, socket: OwnedFd) -> eyre::Result<()> {
    // Nothing after this line runs privileged. If the drop itself fails we
    // abort without transferring; the client reports the crash.
    privilege::drop_all()?;

    channel
        .send_with_fd(&wire::encode_success(), socket.as_fd())
        .wrap_err("failed to transfer descriptor")?;
    // Our reference closes here; the client now holds the only user-space
    // handle to the socket.
    drop(socket);

    info!("descriptor transferred");
    Ok(())
}

fn refuse(channel: HelperChannel, failure: Failure) -> eyre::Result<()> {
    if let Err(err) = privilege::drop_all() {
        warn!("failed to drop privileges: {err}");
    }

    channel
        .send(&wire::encode_failure(&failure))
        .wrap_err("failed to report failure to client")?;

    Err(eyre!("{}", failure.reason))
}

fn create_socket(record: &RequestRecord, privileged: bool) -> Result<OwnedFd, Failure> {
    if record.interface.is_empty() || record.interface.len() > MAX_IFACE_LEN {
        return Err(Failure::new(
            FailureCode::InvalidInterface,
            format!("interface name must be 1..={MAX_IFACE_LEN} bytes"),
        ));
    }
    let ifindex = if_nametoindex(record.interface.as_str()).map_err(|errno| {
        Failure::new(
            FailureCode::InvalidInterface,
            format!("no such interface {:?}: {errno}", record.interface),
        )
    })?;

    let protocol = Protocol::from_code(record.protocol).ok_or_else(|| {
        Failure::new(
            FailureCode::UnsupportedProtocol,
            format!("unknown protocol selector {}", record.protocol),
        )
    })?;

    if !privileged {
        return Err(Failure::new(
            FailureCode::PermissionDenied,
            "helper lacks CAP_NET_RAW; is rawsocket-helper installed with setcap cap_net_raw+ep?",
        ));
    }

    packet::open_raw_socket(ifindex, protocol, record.promiscuous).map_err(|err| {
        let code = if err.kind() == io::ErrorKind::PermissionDenied {
            FailureCode::PermissionDenied
        } else {
            FailureCode::SocketCreateFailed
        };
        Failure::new(code, err.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(interface: &str, protocol: u8) -> RequestRecord {
        RequestRecord {
            interface: interface.into(),
            protocol,
            promiscuous: false,
        }
    }

    #[test]
    fn nonexistent_interface_is_rejected() {
        let failure = create_socket(&record("nosuchif0", 0), true).unwrap_err();
        assert_eq!(failure.code, FailureCode::InvalidInterface);
    }

    #[test]
    fn empty_interface_is_rejected() {
        let failure = create_socket(&record("", 0), true).unwrap_err();
        assert_eq!(failure.code, FailureCode::InvalidInterface);
    }

    #[test]
    fn oversized_interface_is_rejected() {
        let failure = create_socket(&record("an-interface-name-past-ifnamsiz", 0), true).unwrap_err();
        assert_eq!(failure.code, FailureCode::InvalidInterface);
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let failure = create_socket(&record("lo", 0xff), true).unwrap_err();
        assert_eq!(failure.code, FailureCode::UnsupportedProtocol);
    }

    #[test]
    fn interface_is_validated_before_protocol() {
        let failure = create_socket(&record("nosuchif0", 0xff), true).unwrap_err();
        assert_eq!(failure.code, FailureCode::InvalidInterface);
    }

    #[test]
    fn unprivileged_helper_reports_permission_denied() {
        let failure = create_socket(&record("lo", 0), false).unwrap_err();
        assert_eq!(failure.code, FailureCode::PermissionDenied);
    }
}
