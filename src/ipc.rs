//! The transfer channel: one `AF_UNIX`/`SOCK_SEQPACKET` pair per
//! acquisition.
//!
//! Seqpacket keeps message boundaries, delivers FIFO, and carries a
//! descriptor as `SCM_RIGHTS` ancillary data atomically with its payload.
//! It also yields end-of-file on the client end when the helper exits,
//! so helper death is observable without waiting out the timeout.
//!
//! Receiving and responding consume the channel end, so a consumed channel
//! cannot be used twice.

use crate::wire::MAX_RECORD;
use nix::cmsg_space;
use nix::errno::Errno;
use nix::sys::socket::{
    recv, recvmsg, sendmsg, setsockopt, socketpair, sockopt::ReceiveTimeout, AddressFamily,
    ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType,
};
use nix::sys::time::{TimeVal, TimeValLike};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// One response message: payload plus at most one attached descriptor.
#[derive(Debug)]
pub(crate) struct Message {
    pub(crate) payload: Vec<u8>,
    pub(crate) fd: Option<OwnedFd>,
}

/// Create the pair. Both ends are CLOEXEC; the helper end is re-marked
/// inheritable only at spawn time.
pub(crate) fn channel() -> nix::Result<(ClientEnd, HelperEnd)> {
    let (client, helper) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::SOCK_CLOEXEC,
    )?;
    Ok((ClientEnd(client), HelperEnd(helper)))
}

/// The requester's end of the pair.
pub(crate) struct ClientEnd(OwnedFd);

impl ClientEnd {
    /// Bound the wait in [`recv_response`](Self::recv_response). Zero
    /// disables the bound.
    pub(crate) fn set_recv_timeout(&self, timeout: Duration) -> nix::Result<()> {
        let micros = timeout.as_micros().try_into().unwrap_or(i64::MAX);
        setsockopt(&self.0, ReceiveTimeout, &TimeVal::microseconds(micros))
    }

    pub(crate) fn send(&self, payload: &[u8]) -> nix::Result<()> {
        let iov = [IoSlice::new(payload)];
        sendmsg::<()>(self.0.as_raw_fd(), &iov, &[], MsgFlags::MSG_NOSIGNAL, None)?;
        Ok(())
    }

    /// Receive the single response message, consuming this end.
    ///
    /// `Ok(None)` means the peer closed the channel without responding.
    /// The received descriptor, if any, is CLOEXEC in this process. Should
    /// a message ever carry more than one descriptor, the extras are
    /// closed on the spot: the channel hands over at most one.
    pub(crate) fn recv_response(self) -> nix::Result<Option<Message>> {
        let mut buf = [0u8; MAX_RECORD];
        let (bytes, fd) = {
            let mut iov = [IoSliceMut::new(&mut buf)];
            let mut cmsg_buffer = cmsg_space!([RawFd; 1]);
            let msg = recvmsg::<()>(
                self.0.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buffer),
                MsgFlags::MSG_CMSG_CLOEXEC,
            )?;

            let mut fd = None;
            for cmsg in msg.cmsgs()? {
                if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                    for raw in raw_fds {
                        let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                        if fd.is_none() {
                            fd = Some(owned);
                        }
                    }
                }
            }
            (msg.bytes, fd)
        };

        if bytes == 0 {
            return Ok(None);
        }
        Ok(Some(Message {
            payload: buf[..bytes].to_vec(),
            fd,
        }))
    }
}

/// The end destined for the helper process.
pub(crate) struct HelperEnd(OwnedFd);

impl HelperEnd {
    /// Clear CLOEXEC so the descriptor survives the exec into the helper,
    /// and return the number the child will see.
    pub(crate) fn inherit_for_spawn(&self) -> nix::Result<RawFd> {
        let fd = self.0.as_raw_fd();
        Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFD, 0) })?;
        Ok(fd)
    }
}

/// The helper process's handle on its inherited channel end.
pub(crate) struct HelperChannel(OwnedFd);

impl HelperChannel {
    /// # Safety
    ///
    /// `fd` must be the channel end inherited from the spawning client and
    /// must not be owned elsewhere in this process.
    pub(crate) unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Read the single request record. Any ancillary data a client smuggles
    /// in is discarded unread.
    pub(crate) fn recv_request(&self) -> nix::Result<Vec<u8>> {
        let mut buf = [0u8; MAX_RECORD];
        let n = recv(self.0.as_raw_fd(), &mut buf, MsgFlags::empty())?;
        Ok(buf[..n].to_vec())
    }

    /// Send the success record with the descriptor attached, atomically in
    /// one message. Consumes the channel: one response per acquisition.
    pub(crate) fn send_with_fd(self, payload: &[u8], fd: BorrowedFd<'_>) -> nix::Result<()> {
        let iov = [IoSlice::new(payload)];
        let fds = [fd.as_raw_fd()];
        let cmsg = [ControlMessage::ScmRights(&fds)];
        sendmsg::<()>(self.0.as_raw_fd(), &iov, &cmsg, MsgFlags::MSG_NOSIGNAL, None)?;
        Ok(())
    }

    /// Send a failure record. Consumes the channel.
    pub(crate) fn send(self, payload: &[u8]) -> nix::Result<()> {
        let iov = [IoSlice::new(payload)];
        sendmsg::<()>(self.0.as_raw_fd(), &iov, &[], MsgFlags::MSG_NOSIGNAL, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::{AsFd, IntoRawFd};

    #[test]
    fn pair_carries_payload_and_descriptor() {
        let (client, helper) = channel().unwrap();
        let helper = unsafe { HelperChannel::from_raw_fd(helper.0.into_raw_fd()) };

        // hand one end of a pipe across the pair and prove it still works
        let (pipe_read, pipe_write) = nix::unistd::pipe().unwrap();
        helper.send_with_fd(b"\x00", pipe_read.as_fd()).unwrap();
        drop(pipe_read);

        let message = client.recv_response().unwrap().expect("a message");
        assert_eq!(message.payload, b"\x00");
        let received = message.fd.expect("a descriptor");

        nix::unistd::write(&pipe_write, b"x").unwrap();
        let mut byte = [0u8; 1];
        nix::unistd::read(received.as_raw_fd(), &mut byte).unwrap();
        assert_eq!(&byte, b"x");
    }

    #[test]
    fn request_payload_reaches_helper_side() {
        let (client, helper) = channel().unwrap();
        let helper = unsafe { HelperChannel::from_raw_fd(helper.0.into_raw_fd()) };

        client.send(b"\x02lo\x00\x00").unwrap();
        assert_eq!(helper.recv_request().unwrap(), b"\x02lo\x00\x00");
    }

    #[test]
    fn closed_helper_end_reads_as_no_response() {
        let (client, helper) = channel().unwrap();
        drop(helper);
        assert!(client.recv_response().unwrap().is_none());
    }

    #[test]
    fn recv_timeout_fires() {
        let (client, _helper) = channel().unwrap();
        client.set_recv_timeout(Duration::from_millis(50)).unwrap();
        let err = client.recv_response().unwrap_err();
        assert_eq!(err, nix::errno::Errno::EAGAIN);
    }
}
