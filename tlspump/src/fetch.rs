//! Request orchestration: compose the request, then run fresh
//! connection + session + driver for each attempt.

use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{error, info, info_span};

use crate::config::Config;
use crate::connector;
use crate::driver::{Driver, Outcome};
use crate::engine::{Engine, RustlsEngine};
use crate::error::{EngineOp, Error};
use crate::metrics;
use crate::poller;

/// Totals across the attempts of one [`fetch`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Outcome of each completed attempt, in order.
    pub outcomes: Vec<Outcome>,
}

impl Summary {
    /// Number of attempts that completed.
    pub fn attempts(&self) -> usize {
        self.outcomes.len()
    }

    /// Plaintext bytes delivered across all attempts.
    pub fn plaintext_bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.plaintext_delivered).sum()
    }
}

/// Compose the HTTP/1.1 GET request for `path` on `hostname`.
pub fn build_request(
    hostname: &str,
    path: &str,
    user_agent: &str,
    accept: &str,
) -> Result<Bytes, Error> {
    if path.is_empty() {
        return Err(Error::Config("path must not be empty".into()));
    }
    if path.bytes().any(|b| matches!(b, b' ' | b'\r' | b'\n')) {
        return Err(Error::Config(format!("invalid request path {path:?}")));
    }
    if hostname.bytes().any(|b| matches!(b, b'\r' | b'\n')) {
        return Err(Error::Config(format!("invalid hostname {hostname:?}")));
    }

    let mut req = BytesMut::with_capacity(128 + path.len() + hostname.len());
    req.put_slice(b"GET ");
    req.put_slice(path.as_bytes());
    req.put_slice(b" HTTP/1.1\r\n");
    for (name, value) in [
        ("Host", hostname),
        ("User-Agent", user_agent),
        ("Accept", accept),
        ("Connection", "close"),
    ] {
        req.put_slice(name.as_bytes());
        req.put_slice(b": ");
        req.put_slice(value.as_bytes());
        req.put_slice(b"\r\n");
    }
    req.put_slice(b"\r\n");
    Ok(req.freeze())
}

/// Queue the whole request as plaintext on the session.
pub fn submit<E: Engine + ?Sized>(engine: &mut E, mut request: &[u8]) -> Result<(), Error> {
    while !request.is_empty() {
        let n = engine.write(request)?;
        if n == 0 {
            return Err(Error::engine(
                EngineOp::Write,
                io::Error::new(io::ErrorKind::WriteZero, "engine accepted no plaintext"),
            ));
        }
        request = &request[n..];
    }
    Ok(())
}

/// One attempt: connect, create the session, submit `request`, and drive the
/// exchange to completion, forwarding the response to `out`.
///
/// The connection, session and multiplexer live only for this call and are
/// released on every return path.
pub fn fetch_once<O: Write + ?Sized>(
    config: &Config,
    client_config: &Arc<rustls::ClientConfig>,
    hostname: &str,
    request: &[u8],
    out: &mut O,
) -> Result<Outcome, Error> {
    let conn = connector::connect(hostname, config.port, config.tcp_nodelay)?;
    info!(peer = %conn.peer_addr(), "connected");

    let mut engine = RustlsEngine::new(Arc::clone(client_config), hostname)?;
    submit(&mut engine, request)?;

    let poller = poller::open(config.backend, conn.as_raw_fd())?;
    let mut driver = Driver::new(engine, conn, poller, config.buffer_size);
    driver.run(out)
}

/// Fetch `path` from `hostname` `config.repeat` times in sequence.
///
/// Each attempt uses a new connection and a new session sharing
/// `client_config`. The first failing attempt aborts the rest and its error
/// is returned.
pub fn fetch<O: Write + ?Sized>(
    config: &Config,
    client_config: &Arc<rustls::ClientConfig>,
    hostname: &str,
    path: &str,
    out: &mut O,
) -> Result<Summary, Error> {
    config.validate()?;
    let request = build_request(hostname, path, &config.user_agent, &config.accept)?;

    let mut summary = Summary::default();
    for attempt in 1..=config.repeat {
        let span = info_span!("attempt", n = attempt, of = config.repeat);
        let _enter = span.enter();
        info!(host = hostname, path, "fetching");

        let result = fetch_once(config, client_config, hostname, &request, out).and_then(|o| {
            out.flush().map_err(|source| Error::Write {
                target: "stdout",
                source,
            })?;
            Ok(o)
        });
        match result {
            Ok(outcome) => {
                metrics::ATTEMPTS_COMPLETED.increment();
                info!(
                    bytes = outcome.plaintext_delivered,
                    finish = ?outcome.finish,
                    "attempt complete"
                );
                summary.outcomes.push(outcome);
            }
            Err(e) => {
                metrics::ATTEMPTS_FAILED.increment();
                error!(phase = e.phase(), error = %e, "attempt failed");
                return Err(e);
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Finish;

    #[test]
    fn request_layout() {
        let req = build_request("example.com", "/index.html", "tlspump-test", "text/html").unwrap();
        assert_eq!(
            &req[..],
            b"GET /index.html HTTP/1.1\r\n\
              Host: example.com\r\n\
              User-Agent: tlspump-test\r\n\
              Accept: text/html\r\n\
              Connection: close\r\n\
              \r\n"
        );
    }

    #[test]
    fn request_path_validated() {
        assert!(build_request("h", "", "ua", "*/*").is_err());
        assert!(build_request("h", "/a b", "ua", "*/*").is_err());
        assert!(build_request("h", "/\r\nX: y", "ua", "*/*").is_err());
        assert!(build_request("h\r\n", "/", "ua", "*/*").is_err());
    }

    /// Accepts at most `chunk` bytes per write; `chunk == 0` refuses all.
    struct Stingy {
        chunk: usize,
        taken: Vec<u8>,
    }

    impl Engine for Stingy {
        fn wants_read(&self) -> bool {
            false
        }
        fn wants_write(&self) -> bool {
            false
        }
        fn is_handshaking(&self) -> bool {
            true
        }
        fn write(&mut self, plaintext: &[u8]) -> Result<usize, Error> {
            let n = plaintext.len().min(self.chunk);
            self.taken.extend_from_slice(&plaintext[..n]);
            Ok(n)
        }
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Error> {
            Ok(0)
        }
        fn read_tls(&mut self, _ciphertext: &[u8]) -> Result<usize, Error> {
            Ok(0)
        }
        fn write_tls(&mut self, _buf: &mut [u8]) -> Result<usize, Error> {
            Ok(0)
        }
        fn process_new_packets(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn submit_loops_until_accepted() {
        let mut engine = Stingy {
            chunk: 5,
            taken: Vec::new(),
        };
        submit(&mut engine, b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(engine.taken, b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn submit_rejects_stalled_engine() {
        let mut engine = Stingy {
            chunk: 0,
            taken: Vec::new(),
        };
        let err = submit(&mut engine, b"GET").unwrap_err();
        assert!(matches!(
            err,
            Error::Engine {
                op: EngineOp::Write,
                ..
            }
        ));
    }

    #[test]
    fn summary_totals() {
        let outcome = |bytes| Outcome {
            finish: Finish::TransportEof,
            ciphertext_received: 0,
            ciphertext_sent: 0,
            plaintext_delivered: bytes,
            wakeups: 1,
        };
        let summary = Summary {
            outcomes: vec![outcome(10), outcome(20)],
        };
        assert_eq!(summary.attempts(), 2);
        assert_eq!(summary.plaintext_bytes(), 30);
    }

    #[test]
    fn invalid_config_fails_before_connecting() {
        let mut config = Config::default();
        config.repeat = 0;
        let client_config = crate::tls::client_config(None).unwrap();
        let mut out = Vec::new();
        let err = fetch(&config, &client_config, "example.invalid", "/", &mut out).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(out.is_empty());
    }
}
