use std::path::PathBuf;

use crate::error::Error;

/// Default HTTPS port.
pub const HTTPS_PORT: u16 = 443;

/// Number of fetch attempts made by default.
pub const DEFAULT_REPEAT: u32 = 3;

/// Default transfer buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

const MIN_BUFFER_SIZE: usize = 512;
const MAX_BUFFER_SIZE: usize = 1 << 20;

/// Readiness backend used to wait on the socket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// `epoll(7)`, level-triggered, one event slot.
    #[default]
    Epoll,
    /// io_uring one-shot `PollAdd`. Requires the `uring` feature.
    Uring,
}

/// Configuration for a fetch run.
#[derive(Clone, Debug)]
pub struct Config {
    /// TCP port to connect to.
    pub port: u16,
    /// Number of sequential fetch attempts. Each gets a fresh connection and
    /// TLS session; the first failure aborts the rest.
    pub repeat: u32,
    /// Capacity of the transfer buffer used for socket reads, engine output
    /// and plaintext drains.
    pub buffer_size: usize,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// `Accept` header value.
    pub accept: String,
    /// Enable TCP_NODELAY on the connection.
    pub tcp_nodelay: bool,
    /// Readiness backend.
    pub backend: Backend,
    /// PEM file with trust anchors. `None` uses the bundled webpki roots.
    pub ca_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: HTTPS_PORT,
            repeat: DEFAULT_REPEAT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            user_agent: concat!("tlspump/", env!("CARGO_PKG_VERSION")).to_string(),
            accept: "carcinization/inevitable, text/html".to_string(),
            tcp_nodelay: true,
            backend: Backend::Epoll,
            ca_file: None,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), Error> {
        if self.repeat == 0 {
            return Err(Error::Config("repeat must be > 0".into()));
        }
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(Error::Config(format!(
                "buffer_size must be between {MIN_BUFFER_SIZE} and {MAX_BUFFER_SIZE}"
            )));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be > 0".into()));
        }
        check_header_value("user_agent", &self.user_agent)?;
        check_header_value("accept", &self.accept)?;
        if self.backend == Backend::Uring && !cfg!(feature = "uring") {
            return Err(Error::Config(
                "uring backend requires the `uring` feature".into(),
            ));
        }
        Ok(())
    }
}

fn check_header_value(name: &str, value: &str) -> Result<(), Error> {
    if value.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(Error::Config(format!("{name} must not contain CR or LF")));
    }
    Ok(())
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use tlspump::ConfigBuilder;
///
/// let config = ConfigBuilder::default()
///     .port(8443)
///     .repeat(1)
///     .buffer_size(4096)
///     .build()
///     .expect("invalid config");
/// assert_eq!(config.port, 8443);
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TCP port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the number of fetch attempts.
    pub fn repeat(mut self, n: u32) -> Self {
        self.config.repeat = n;
        self
    }

    /// Set the transfer buffer capacity in bytes.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    /// Set the `User-Agent` header value.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    /// Set the `Accept` header value.
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.config.accept = accept.into();
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.config.tcp_nodelay = enable;
        self
    }

    /// Select the readiness backend.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Load trust anchors from a PEM file instead of the bundled roots.
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_file = Some(path.into());
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<Config, Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.port, 443);
        assert_eq!(config.repeat, 3);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn zero_repeat_rejected() {
        assert!(matches!(
            ConfigBuilder::new().repeat(0).build(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn buffer_size_bounds() {
        assert!(ConfigBuilder::new().buffer_size(511).build().is_err());
        assert!(ConfigBuilder::new().buffer_size(512).build().is_ok());
        assert!(ConfigBuilder::new().buffer_size(2 << 20).build().is_err());
    }

    #[test]
    fn header_injection_rejected() {
        let err = ConfigBuilder::new()
            .user_agent("x\r\nEvil: 1")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("user_agent"));
    }

    #[cfg(not(feature = "uring"))]
    #[test]
    fn uring_needs_feature() {
        assert!(ConfigBuilder::new().backend(Backend::Uring).build().is_err());
    }
}
