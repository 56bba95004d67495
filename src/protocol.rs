//! Ident (RFC 1413) query classification and response generation.
//!
//! A query is a single line of the form `<port-on-server> , <port-on-client>`.
//! Only the shape of the line is validated: each port is 1 to 5 ASCII digits,
//! separated by a comma with optional spaces on either side. Port values are
//! never range-checked, so `99999,99999` is a well-formed query.

use bytes::{Bytes, BytesMut};

/// Maximum number of query bytes kept from a line; the rest is discarded
pub const MAX_LINE_LENGTH: usize = 1024;

/// Maximum number of digits in a port field
const MAX_PORT_DIGITS: usize = 5;

/// Operating system token used in USERID replies
const OPSYS: &str = "UNIX";

/// Classified reply to a single query line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Well-formed query, identity configured
    UserId { query: Bytes, identity: String },

    /// Well-formed query, no identity configured
    NoUser { query: Bytes },

    /// Line does not match the port-pair pattern
    UnknownError { query: Bytes },
}

impl Response {
    /// Classify a raw line read from the client.
    ///
    /// Trailing ASCII whitespace (including CR and LF) is stripped first; the
    /// remaining bytes are echoed verbatim in the reply, whether or not they
    /// are valid UTF-8.
    pub fn classify(line: &[u8], identity: &str) -> Self {
        let query = Bytes::copy_from_slice(line.trim_ascii_end());

        if !is_port_pair(&query) {
            Response::UnknownError { query }
        } else if identity.is_empty() {
            Response::NoUser { query }
        } else {
            Response::UserId {
                query,
                identity: identity.to_string(),
            }
        }
    }

    /// Reply kind as it appears on the wire, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Response::UserId { .. } => "USERID",
            Response::NoUser { .. } => "NO-USER",
            Response::UnknownError { .. } => "UNKNOWN-ERROR",
        }
    }

    /// Encode the reply.
    ///
    /// USERID replies always end in CRLF. ERROR replies only do so when
    /// `crlf_all` is set.
    pub fn encode(&self, crlf_all: bool) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);

        match self {
            Response::UserId { query, identity } => {
                buf.extend_from_slice(query);
                buf.extend_from_slice(b" : USERID : ");
                buf.extend_from_slice(OPSYS.as_bytes());
                buf.extend_from_slice(b" : ");
                buf.extend_from_slice(identity.as_bytes());
                buf.extend_from_slice(b"\r\n");
                return buf;
            }
            Response::NoUser { query } => {
                buf.extend_from_slice(query);
                buf.extend_from_slice(b" : ERROR : NO-USER");
            }
            Response::UnknownError { query } => {
                buf.extend_from_slice(query);
                buf.extend_from_slice(b" : ERROR : UNKNOWN-ERROR");
            }
        }

        if crlf_all {
            buf.extend_from_slice(b"\r\n");
        }
        buf
    }
}

/// Check `^[0-9]{1,5} *, *[0-9]{1,5}$`.
pub fn is_port_pair(text: &[u8]) -> bool {
    let Some(comma) = text.iter().position(|&b| b == b',') else {
        return false;
    };
    let (server, client) = (&text[..comma], &text[comma + 1..]);

    is_port(trim_spaces_end(server)) && is_port(trim_spaces_start(client))
}

fn trim_spaces_end(field: &[u8]) -> &[u8] {
    let end = field.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &field[..end]
}

fn trim_spaces_start(field: &[u8]) -> &[u8] {
    let start = field.iter().position(|&b| b != b' ').unwrap_or(field.len());
    &field[start..]
}

fn is_port(field: &[u8]) -> bool {
    !field.is_empty() && field.len() <= MAX_PORT_DIGITS && field.iter().all(u8::is_ascii_digit)
}
