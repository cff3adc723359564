use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by a fetch attempt.
#[derive(Debug, Error)]
pub enum Error {
    /// Address resolution failed (or produced no addresses).
    #[error("resolving {host}: {source}")]
    Resolution { host: String, source: io::Error },
    /// `socket(2)` failed.
    #[error("making socket: {0}")]
    Socket(io::Error),
    /// `connect(2)` failed for the last address tried.
    #[error("connecting to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },
    /// The hostname cannot be used as a TLS server name.
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    /// The TLS engine reported a handshake or record-layer failure.
    #[error("engine {op}: {source}")]
    Engine { op: EngineOp, source: EngineError },
    /// Peer closed the transport before the handshake completed.
    #[error("peer closed the connection during the handshake")]
    TransportEof,
    /// Reading ciphertext from the socket failed.
    #[error("reading from socket: {0}")]
    Read(io::Error),
    /// Writing to the socket or to the output sink failed.
    #[error("writing to {target}: {source}")]
    Write {
        target: &'static str,
        source: io::Error,
    },
    /// Readiness registration or wait failed.
    #[error("readiness wait: {0}")]
    Poll(io::Error),
    /// Invalid configuration value or request argument.
    #[error("config: {0}")]
    Config(String),
    /// Trust anchors could not be loaded.
    #[error("loading CA file {}: {source}", path.display())]
    CaFile { path: PathBuf, source: io::Error },
}

impl Error {
    /// Name of the fetch phase that produced this error.
    pub fn phase(&self) -> &'static str {
        match self {
            Error::Resolution { .. } => "resolve",
            Error::Socket(_) => "socket",
            Error::Connect { .. } => "connect",
            Error::InvalidServerName(_) => "session",
            Error::Engine { .. } | Error::TransportEof => "tls",
            Error::Read(_) => "socket read",
            Error::Write { .. } => "write",
            Error::Poll(_) => "poll",
            Error::Config(_) | Error::CaFile { .. } => "config",
        }
    }

    pub(crate) fn engine(op: EngineOp, source: impl Into<EngineError>) -> Self {
        Error::Engine {
            op,
            source: source.into(),
        }
    }
}

/// Failure surfaced by the TLS engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Tls(#[from] rustls::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Engine operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOp {
    New,
    Write,
    Read,
    ReadTls,
    WriteTls,
    ProcessNewPackets,
}

impl std::fmt::Display for EngineOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EngineOp::New => "new",
            EngineOp::Write => "write",
            EngineOp::Read => "read",
            EngineOp::ReadTls => "read_tls",
            EngineOp::WriteTls => "write_tls",
            EngineOp::ProcessNewPackets => "process_new_packets",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names() {
        let err = Error::Connect {
            addr: "127.0.0.1:443".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(err.phase(), "connect");
        assert_eq!(Error::TransportEof.phase(), "tls");
        assert_eq!(Error::Config("x".into()).phase(), "config");
    }

    #[test]
    fn engine_error_display_names_operation() {
        let err = Error::engine(
            EngineOp::ProcessNewPackets,
            rustls::Error::DecryptError,
        );
        let msg = err.to_string();
        assert!(msg.starts_with("engine process_new_packets: "), "{msg}");
    }
}
