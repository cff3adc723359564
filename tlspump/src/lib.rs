//! tlspump: a readiness-driven TLS client pump for Linux.
//!
//! tlspump fetches a resource over HTTPS by hand-driving a TLS session
//! engine over a plain TCP socket. One blocking event loop per attempt
//! moves ciphertext between the socket and the engine, and forwards the
//! decrypted response bytes, untouched, to a caller-supplied sink.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tlspump::{ConfigBuilder, fetch, tls};
//!
//! fn main() -> Result<(), tlspump::Error> {
//!     let config = ConfigBuilder::new().repeat(1).build()?;
//!     let client_config = tls::client_config(None)?;
//!     let mut stdout = std::io::stdout().lock();
//!     let summary = fetch(&config, &client_config, "example.com", "/", &mut stdout)?;
//!     eprintln!("{} bytes", summary.plaintext_bytes());
//!     Ok(())
//! }
//! ```
//!
//! # Platform
//!
//! Linux only. The default multiplexer is epoll; the `uring` feature adds
//! an io_uring `PollAdd` backend.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod sink;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod connection;
pub mod connector;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod poller;
pub mod tls;

// ── Re-exports: Orchestration ───────────────────────────────────────────

/// Compose the HTTP/1.1 GET request sent on every attempt.
pub use fetch::build_request;
/// Fetch a path `repeat` times, each over a fresh connection.
pub use fetch::fetch;
/// Run a single attempt with an already-built request.
pub use fetch::fetch_once;
/// Queue request plaintext on a session engine.
pub use fetch::submit;
/// Per-call totals returned by [`fetch()`].
pub use fetch::Summary;

// ── Re-exports: Event loop ──────────────────────────────────────────────

/// Blocking readiness loop for one attempt.
pub use driver::Driver;
/// How a successful run ended.
pub use driver::Finish;
/// Byte and wakeup counts for one run.
pub use driver::Outcome;
/// Event loop states.
pub use driver::Phase;
/// Directions the driver wants to be woken for.
pub use poller::Interest;
/// Readiness source for a single descriptor.
pub use poller::Multiplexer;
/// Directions a descriptor is ready for.
pub use poller::Readiness;
/// epoll-backed [`Multiplexer`].
pub use poller::EpollPoller;
/// io_uring-backed [`Multiplexer`].
#[cfg(feature = "uring")]
pub use poller::UringPoller;

// ── Re-exports: Shared types ────────────────────────────────────────────

/// Connected TCP socket for one attempt.
pub use connection::Connection;
/// Resolve a host name and connect to the first reachable address.
pub use connector::connect;
/// Multiplexer backend selection.
pub use config::Backend;
/// Client configuration.
pub use config::Config;
/// Builder for [`Config`] with discoverable methods and `build()` validation.
pub use config::ConfigBuilder;
/// Session engine abstraction driven by [`Driver`].
pub use engine::Engine;
/// rustls-backed [`Engine`].
pub use engine::RustlsEngine;
/// Negotiated session parameters.
pub use engine::TlsInfo;
/// Failing engine operation, carried by [`Error::Engine`].
pub use error::EngineOp;
/// Error type for all tlspump operations.
pub use error::Error;
