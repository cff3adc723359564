//! The TLS engine boundary.
//!
//! The driver never touches rustls directly; it talks to an [`Engine`],
//! which exposes the buffer-oriented operations of a client TLS session.
//! [`RustlsEngine`] is the production implementation.

use std::io::{self, Read as _, Write as _};
use std::sync::Arc;

use rustls::ClientConnection;
use rustls::pki_types::ServerName;

use crate::error::{EngineOp, Error};

/// Information about a negotiated TLS session.
#[derive(Debug, Clone)]
pub struct TlsInfo {
    pub protocol_version: Option<rustls::ProtocolVersion>,
    pub cipher_suite: Option<rustls::CipherSuite>,
    pub alpn_protocol: Option<Vec<u8>>,
}

/// A client TLS session as seen by the protocol driver.
pub trait Engine {
    /// Whether the session needs more ciphertext from the peer.
    fn wants_read(&self) -> bool;

    /// Whether the session has ciphertext queued for the peer.
    fn wants_write(&self) -> bool;

    /// Whether the handshake is still in progress.
    fn is_handshaking(&self) -> bool;

    /// Queue plaintext for encryption. Returns the number of bytes accepted.
    fn write(&mut self, plaintext: &[u8]) -> Result<usize, Error>;

    /// Copy decrypted plaintext into `buf`. `Ok(0)` means nothing more is
    /// available until the next ingestion cycle.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Hand ciphertext received from the socket to the session. Returns the
    /// number of bytes consumed; `Ok(0)` means the engine saw end of input.
    fn read_tls(&mut self, ciphertext: &[u8]) -> Result<usize, Error>;

    /// Fill `buf` with ciphertext for the peer. `Ok(0)` means nothing pending.
    fn write_tls(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Decode the records made complete by the last `read_tls`.
    fn process_new_packets(&mut self) -> Result<(), Error>;

    /// Negotiated session parameters, once known.
    fn info(&self) -> Option<TlsInfo> {
        None
    }
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn wants_read(&self) -> bool {
        (**self).wants_read()
    }

    fn wants_write(&self) -> bool {
        (**self).wants_write()
    }

    fn is_handshaking(&self) -> bool {
        (**self).is_handshaking()
    }

    fn write(&mut self, plaintext: &[u8]) -> Result<usize, Error> {
        (**self).write(plaintext)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).read(buf)
    }

    fn read_tls(&mut self, ciphertext: &[u8]) -> Result<usize, Error> {
        (**self).read_tls(ciphertext)
    }

    fn write_tls(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).write_tls(buf)
    }

    fn process_new_packets(&mut self) -> Result<(), Error> {
        (**self).process_new_packets()
    }

    fn info(&self) -> Option<TlsInfo> {
        (**self).info()
    }
}

/// [`Engine`] backed by a `rustls::ClientConnection`.
pub struct RustlsEngine {
    conn: ClientConnection,
}

impl RustlsEngine {
    /// Create a session bound to `hostname`, used for SNI and certificate
    /// verification.
    pub fn new(config: Arc<rustls::ClientConfig>, hostname: &str) -> Result<Self, Error> {
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::InvalidServerName(hostname.to_string()))?;
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| Error::engine(EngineOp::New, e))?;
        Ok(RustlsEngine { conn })
    }
}

impl Engine for RustlsEngine {
    fn wants_read(&self) -> bool {
        self.conn.wants_read()
    }

    fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    fn write(&mut self, plaintext: &[u8]) -> Result<usize, Error> {
        self.conn
            .writer()
            .write(plaintext)
            .map_err(|e| Error::engine(EngineOp::Write, e))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.conn.reader().read(buf) {
            Ok(n) => Ok(n),
            // No plaintext buffered until more records are decoded.
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::engine(EngineOp::Read, e)),
        }
    }

    fn read_tls(&mut self, ciphertext: &[u8]) -> Result<usize, Error> {
        let mut cursor = io::Cursor::new(ciphertext);
        self.conn
            .read_tls(&mut cursor)
            .map_err(|e| Error::engine(EngineOp::ReadTls, e))
    }

    fn write_tls(&mut self, mut buf: &mut [u8]) -> Result<usize, Error> {
        self.conn
            .write_tls(&mut buf)
            .map_err(|e| Error::engine(EngineOp::WriteTls, e))
    }

    fn process_new_packets(&mut self) -> Result<(), Error> {
        self.conn
            .process_new_packets()
            .map(drop)
            .map_err(|e| Error::engine(EngineOp::ProcessNewPackets, e))
    }

    fn info(&self) -> Option<TlsInfo> {
        if self.conn.is_handshaking() {
            return None;
        }
        Some(TlsInfo {
            protocol_version: self.conn.protocol_version(),
            cipher_suite: self.conn.negotiated_cipher_suite().map(|s| s.suite()),
            alpn_protocol: self.conn.alpn_protocol().map(|p| p.to_vec()),
        })
    }
}
