use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::warn;

use super::codec::ProtocolError;

/// Failures talking to the origin. Both kinds surface to the client as 502.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to connect to origin {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out connecting to origin {addr}")]
    ConnectTimeout { addr: String },
    #[error("origin {addr} exchange failed")]
    Protocol {
        addr: String,
        #[source]
        source: ProtocolError,
    },
}

/// Normalized classification used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardErrorKind {
    Unreachable,
    Protocol,
}

impl ForwardErrorKind {
    pub fn as_label(self) -> &'static str {
        match self {
            ForwardErrorKind::Unreachable => "unreachable",
            ForwardErrorKind::Protocol => "protocol",
        }
    }
}

impl ForwardError {
    pub fn kind(&self) -> ForwardErrorKind {
        match self {
            ForwardError::Connect { .. } | ForwardError::ConnectTimeout { .. } => {
                ForwardErrorKind::Unreachable
            }
            ForwardError::Protocol { .. } => ForwardErrorKind::Protocol,
        }
    }
}

pub fn log_forward_error(peer: SocketAddr, key: &str, err: &ForwardError) {
    crate::metrics::record_origin_error(err.kind().as_label());
    match err {
        ForwardError::Connect { addr, source } => warn!(
            peer = %peer,
            key,
            origin = %addr,
            error = %source,
            "origin unreachable"
        ),
        ForwardError::ConnectTimeout { addr } => warn!(
            peer = %peer,
            key,
            origin = %addr,
            "origin connect timed out"
        ),
        ForwardError::Protocol { addr, source } => warn!(
            peer = %peer,
            key,
            origin = %addr,
            error = %source,
            "origin returned an unusable response"
        ),
    }
}
