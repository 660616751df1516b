//! Byte-level records exchanged over the transfer channel.
//!
//! Request, client to helper, one message:
//!
//! ```text
//! [name_len: u8][name: name_len bytes, UTF-8][protocol: u8][promisc: u8]
//! ```
//!
//! Response, helper to client, one message:
//!
//! ```text
//! [status: u8]                                  status 0 (success)
//! [status: u8][reason_len: u8][reason: bytes]   status 1..=4 (failure)
//! ```
//!
//! A success response carries exactly one descriptor as `SCM_RIGHTS`
//! ancillary data on the same message; a failure carries none. The layout
//! is fixed and must stay stable across client/helper version skew within
//! a release line.

use crate::request::SocketRequest;
use thiserror::Error;

/// Largest record either side will accept.
pub(crate) const MAX_RECORD: usize = 512;

const MAX_NAME: usize = u8::MAX as usize;
const MAX_REASON: usize = u8::MAX as usize;

const STATUS_OK: u8 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum WireError {
    #[error("record truncated")]
    Truncated,
    #[error("interface name of {0} bytes does not fit the record")]
    NameTooLong(usize),
    #[error("string field is not valid UTF-8")]
    NotUtf8,
    #[error("unknown status code {0}")]
    UnknownStatus(u8),
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

/// Failure classes the helper can report. Wire values are the status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FailureCode {
    InvalidInterface = 1,
    UnsupportedProtocol = 2,
    PermissionDenied = 3,
    SocketCreateFailed = 4,
}

impl FailureCode {
    fn from_status(status: u8) -> Option<Self> {
        match status {
            1 => Some(Self::InvalidInterface),
            2 => Some(Self::UnsupportedProtocol),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::SocketCreateFailed),
            _ => None,
        }
    }
}

/// A helper-reported failure: class plus human-readable reason.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Failure {
    pub(crate) code: FailureCode,
    pub(crate) reason: String,
}

impl Failure {
    pub(crate) fn new(code: FailureCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// A decoded request record. Syntactically sound, not yet semantically
/// validated: interface existence and protocol support are checked by the
/// helper proper.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RequestRecord {
    pub(crate) interface: String,
    pub(crate) protocol: u8,
    pub(crate) promiscuous: bool,
}

pub(crate) fn encode_request(request: &SocketRequest) -> Result<Vec<u8>, WireError> {
    let name = request.interface.as_bytes();
    if name.len() > MAX_NAME {
        return Err(WireError::NameTooLong(name.len()));
    }

    let mut buf = Vec::with_capacity(name.len() + 3);
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);
    buf.push(request.protocol.code());
    buf.push(u8::from(request.promiscuous));
    Ok(buf)
}

pub(crate) fn decode_request(buf: &[u8]) -> Result<RequestRecord, WireError> {
    let (&name_len, rest) = buf.split_first().ok_or(WireError::Truncated)?;
    let name_len = name_len as usize;
    if rest.len() < name_len + 2 {
        return Err(WireError::Truncated);
    }

    let (name, tail) = rest.split_at(name_len);
    if tail.len() > 2 {
        return Err(WireError::TrailingBytes(tail.len() - 2));
    }

    let interface = std::str::from_utf8(name)
        .map_err(|_| WireError::NotUtf8)?
        .to_owned();

    Ok(RequestRecord {
        interface,
        protocol: tail[0],
        promiscuous: tail[1] != 0,
    })
}

pub(crate) fn encode_success() -> Vec<u8> {
    vec![STATUS_OK]
}

pub(crate) fn encode_failure(failure: &Failure) -> Vec<u8> {
    let mut len = failure.reason.len().min(MAX_REASON);
    while !failure.reason.is_char_boundary(len) {
        len -= 1;
    }

    let mut buf = Vec::with_capacity(len + 2);
    buf.push(failure.code as u8);
    buf.push(len as u8);
    buf.extend_from_slice(&failure.reason.as_bytes()[..len]);
    buf
}

/// `Ok(None)` is a success record; `Ok(Some(_))` a reported failure.
pub(crate) fn decode_response(buf: &[u8]) -> Result<Option<Failure>, WireError> {
    let (&status, rest) = buf.split_first().ok_or(WireError::Truncated)?;
    if status == STATUS_OK {
        if !rest.is_empty() {
            return Err(WireError::TrailingBytes(rest.len()));
        }
        return Ok(None);
    }

    let code = FailureCode::from_status(status).ok_or(WireError::UnknownStatus(status))?;
    let (&reason_len, reason) = rest.split_first().ok_or(WireError::Truncated)?;
    let reason_len = reason_len as usize;
    if reason.len() < reason_len {
        return Err(WireError::Truncated);
    }
    if reason.len() > reason_len {
        return Err(WireError::TrailingBytes(reason.len() - reason_len));
    }

    let reason = std::str::from_utf8(reason).map_err(|_| WireError::NotUtf8)?;
    Ok(Some(Failure::new(code, reason)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Protocol;

    #[test]
    fn request_record_round_trips() {
        let request = SocketRequest::new("eth0").protocol(Protocol::Arp).promiscuous(true);
        let buf = encode_request(&request).unwrap();
        let record = decode_request(&buf).unwrap();
        assert_eq!(record.interface, "eth0");
        assert_eq!(record.protocol, Protocol::Arp.code());
        assert!(record.promiscuous);
    }

    #[test]
    fn oversized_name_is_rejected_at_encode() {
        let request = SocketRequest::new("x".repeat(300));
        assert_eq!(encode_request(&request), Err(WireError::NameTooLong(300)));
    }

    #[test]
    fn truncated_request_is_rejected() {
        // claims a 4-byte name but only carries 2 bytes of it
        assert_eq!(decode_request(&[4, b'e', b't']), Err(WireError::Truncated));
        assert_eq!(decode_request(&[]), Err(WireError::Truncated));
    }

    #[test]
    fn trailing_request_bytes_are_rejected() {
        assert_eq!(
            decode_request(&[2, b'l', b'o', 0, 0, 9]),
            Err(WireError::TrailingBytes(1))
        );
    }

    #[test]
    fn empty_name_decodes_for_helper_side_validation() {
        let record = decode_request(&[0, 0, 0]).unwrap();
        assert_eq!(record.interface, "");
    }

    #[test]
    fn success_response_round_trips() {
        assert_eq!(decode_response(&encode_success()).unwrap(), None);
    }

    #[test]
    fn success_with_trailing_bytes_is_rejected() {
        assert_eq!(decode_response(&[0, 1]), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn failure_response_round_trips() {
        let failure = Failure::new(FailureCode::InvalidInterface, "no such interface \"eth9\"");
        let decoded = decode_response(&encode_failure(&failure)).unwrap();
        assert_eq!(decoded, Some(failure));
    }

    #[test]
    fn overlong_reason_is_truncated_but_decodable() {
        let failure = Failure::new(FailureCode::SocketCreateFailed, "é".repeat(200));
        let buf = encode_failure(&failure);
        let decoded = decode_response(&buf).unwrap().unwrap();
        assert!(decoded.reason.len() <= 255);
        assert!(failure.reason.starts_with(&decoded.reason));
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_eq!(decode_response(&[9, 0]), Err(WireError::UnknownStatus(9)));
    }
}
