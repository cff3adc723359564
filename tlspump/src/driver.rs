//! Protocol driver: the readiness-driven TLS event loop.
//!
//! One [`Driver`] runs one connection to completion. Each wake-up from the
//! multiplexer moves data in at most two directions:
//!
//! - inbound, when the engine wants to read and the socket is readable:
//!   socket → transfer buffer → `read_tls` → `process_new_packets` →
//!   plaintext drain → sink;
//! - outbound, when the engine wants to write and the socket is writable:
//!   `write_tls` → transfer buffer → socket.
//!
//! A zero-byte socket read is transport EOF and ends the loop. A zero-byte
//! plaintext read only means the engine has nothing more until the next
//! ingestion cycle; it ends the inner drain, never the loop.

use std::io::{self, Read, Write};

use tracing::{debug, info, trace, warn};

use crate::engine::Engine;
use crate::error::Error;
use crate::metrics;
use crate::poller::{Interest, Multiplexer};
use crate::sink;

/// Driver state, reported in trace events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Blocked on the multiplexer.
    AwaitReady,
    /// Reading ciphertext from the socket.
    DrainSocket,
    /// Handing ciphertext to the engine and decoding records.
    FeedEngine,
    /// Extracting decrypted bytes until the engine has none left.
    DrainPlaintext,
    /// Pulling outgoing ciphertext from the engine.
    FlushEngine,
    /// Pushing ciphertext to the socket.
    WriteSocket,
    Done,
    Failed,
}

/// Why a run ended successfully.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Finish {
    /// The peer closed the transport after the handshake.
    TransportEof,
    /// The engine wants neither to read nor to write (e.g. the peer sent
    /// close_notify and everything was drained).
    EngineClosed,
}

/// Result of a completed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub finish: Finish,
    /// Ciphertext bytes read from the socket.
    pub ciphertext_received: u64,
    /// Ciphertext bytes written to the socket.
    pub ciphertext_sent: u64,
    /// Plaintext bytes forwarded to the sink.
    pub plaintext_delivered: u64,
    /// Multiplexer wake-ups.
    pub wakeups: u64,
}

/// Event loop over one engine, one socket and one multiplexer.
pub struct Driver<E, S, M> {
    engine: E,
    poller: M,
    socket: S,
    /// Transfer buffer, shared by socket reads, plaintext drains and engine
    /// output.
    buf: Box<[u8]>,
    ciphertext_received: u64,
    ciphertext_sent: u64,
    plaintext_delivered: u64,
    wakeups: u64,
    handshake_reported: bool,
}

impl<E, S, M> Driver<E, S, M>
where
    E: Engine,
    S: Read + Write,
    M: Multiplexer,
{
    /// Create a driver with a transfer buffer of `buffer_size` bytes.
    pub fn new(engine: E, socket: S, poller: M, buffer_size: usize) -> Self {
        Driver {
            engine,
            poller,
            socket,
            buf: vec![0u8; buffer_size.max(1)].into_boxed_slice(),
            ciphertext_received: 0,
            ciphertext_sent: 0,
            plaintext_delivered: 0,
            wakeups: 0,
            handshake_reported: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Take the driver apart.
    pub fn into_parts(self) -> (E, S, M) {
        (self.engine, self.socket, self.poller)
    }

    /// Run until transport EOF, protocol completion, or the first error.
    /// Decrypted bytes are written to `out` as they are decoded.
    pub fn run<O: Write + ?Sized>(&mut self, out: &mut O) -> Result<Outcome, Error> {
        match self.pump(out) {
            Ok(finish) => {
                trace!(phase = ?Phase::Done, ?finish);
                Ok(Outcome {
                    finish,
                    ciphertext_received: self.ciphertext_received,
                    ciphertext_sent: self.ciphertext_sent,
                    plaintext_delivered: self.plaintext_delivered,
                    wakeups: self.wakeups,
                })
            }
            Err(e) => {
                warn!(phase = ?Phase::Failed, error = %e, "connection failed");
                Err(e)
            }
        }
    }

    fn pump<O: Write + ?Sized>(&mut self, out: &mut O) -> Result<Finish, Error> {
        loop {
            let interest = Interest {
                read: self.engine.wants_read(),
                write: self.engine.wants_write(),
            };
            if interest.is_empty() {
                debug!("engine has nothing left to exchange");
                return Ok(Finish::EngineClosed);
            }

            trace!(phase = ?Phase::AwaitReady, ?interest);
            let ready = self.poller.wait(interest)?;
            self.wakeups += 1;
            metrics::READINESS_WAKEUPS.increment();

            if self.engine.wants_read() && ready.readable {
                if let Some(finish) = self.ingest(out)? {
                    return Ok(finish);
                }
            }

            if self.engine.wants_write() && ready.writable {
                self.flush()?;
            }

            self.report_handshake();
        }
    }

    /// One ingestion cycle: socket read, engine feed, decode, plaintext drain.
    /// Returns `Some` when the transport reached EOF.
    fn ingest<O: Write + ?Sized>(&mut self, out: &mut O) -> Result<Option<Finish>, Error> {
        trace!(phase = ?Phase::DrainSocket);
        self.buf.fill(0);
        let n = loop {
            match self.socket.read(&mut self.buf) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Read(e)),
            }
        };
        if n == 0 {
            debug!("EOF reading from socket");
            return self.transport_eof().map(Some);
        }
        debug!(bytes = n, "read from socket");
        self.ciphertext_received += n as u64;
        metrics::CIPHERTEXT_RECEIVED.add(n as u64);

        let mut fed = 0;
        while fed < n {
            trace!(phase = ?Phase::FeedEngine, offset = fed, len = n - fed);
            let used = self.engine.read_tls(&self.buf[fed..n])?;
            if used == 0 {
                debug!("EOF from engine read_tls");
                return self.transport_eof().map(Some);
            }
            self.engine.process_new_packets()?;
            fed += used;

            // Bytes before `fed` belong to the engine now; the drain may
            // reuse them, but must not touch the unfed tail.
            let room = if fed == n { self.buf.len() } else { fed };
            self.drain_plaintext(out, room)?;
        }
        Ok(None)
    }

    fn drain_plaintext<O: Write + ?Sized>(&mut self, out: &mut O, room: usize) -> Result<(), Error> {
        loop {
            trace!(phase = ?Phase::DrainPlaintext);
            let chunk = &mut self.buf[..room];
            chunk.fill(0);
            let n = self.engine.read(chunk)?;
            if n == 0 {
                // Nothing more until the next ingestion cycle.
                return Ok(());
            }
            sink::write_all(out, &chunk[..n], "stdout")?;
            debug!(bytes = n, "plaintext delivered");
            self.plaintext_delivered += n as u64;
            metrics::PLAINTEXT_DELIVERED.add(n as u64);
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        trace!(phase = ?Phase::FlushEngine);
        self.buf.fill(0);
        let n = self.engine.write_tls(&mut self.buf)?;
        if n == 0 {
            debug!("engine had no ciphertext pending");
            return Ok(());
        }

        trace!(phase = ?Phase::WriteSocket, bytes = n);
        sink::write_all(&mut self.socket, &self.buf[..n], "socket")?;
        debug!(bytes = n, "wrote to socket");
        self.ciphertext_sent += n as u64;
        metrics::CIPHERTEXT_SENT.add(n as u64);
        Ok(())
    }

    /// EOF before the handshake finished fails the attempt; after it, the
    /// exchange is over.
    fn transport_eof(&self) -> Result<Finish, Error> {
        if self.engine.is_handshaking() {
            Err(Error::TransportEof)
        } else {
            Ok(Finish::TransportEof)
        }
    }

    fn report_handshake(&mut self) {
        if self.handshake_reported || self.engine.is_handshaking() {
            return;
        }
        self.handshake_reported = true;
        if let Some(info) = self.engine.info() {
            info!(
                version = ?info.protocol_version,
                suite = ?info.cipher_suite,
                alpn = ?info.alpn_protocol.as_deref().map(String::from_utf8_lossy),
                "handshake complete"
            );
        }
    }
}
