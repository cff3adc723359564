//! tlspump-fetch: fetch `<path>` from `<hostname>` over HTTPS and stream the
//! raw decrypted response to stdout, once per attempt.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tlspump::{Backend, ConfigBuilder, metrics, tls};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tlspump-fetch", version)]
#[command(about = "Fetch a path over HTTPS and write the raw response to stdout", long_about = None)]
struct Cli {
    /// Server host name, used for resolution, SNI and certificate checks.
    hostname: String,

    /// Request path, e.g. `/index.html`.
    path: String,

    /// Number of sequential attempts, each on a fresh connection.
    #[arg(short, long, default_value_t = tlspump::config::DEFAULT_REPEAT)]
    repeat: u32,

    #[arg(short, long, default_value_t = tlspump::config::HTTPS_PORT)]
    port: u16,

    /// PEM file with trust anchors to use instead of the bundled roots.
    #[arg(long, value_name = "PEM")]
    ca_file: Option<PathBuf>,

    /// Transfer buffer size in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = tlspump::config::DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Readiness backend.
    #[arg(long, value_enum, default_value_t = BackendArg::Epoll)]
    backend: BackendArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Epoll,
    Uring,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Epoll => Backend::Epoll,
            BackendArg::Uring => Backend::Uring,
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout; everything else is a usage error.
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let result = run(&cli, &mut io::stdout().lock());

    let m = metrics::snapshot();
    tracing::info!(
        attempts_completed = m.attempts_completed,
        attempts_failed = m.attempts_failed,
        ciphertext_received = m.ciphertext_received,
        ciphertext_sent = m.ciphertext_sent,
        plaintext_delivered = m.plaintext_delivered,
        wakeups = m.readiness_wakeups,
        "done"
    );

    exit_code(result)
}

fn exit_code(result: Result<(), tlspump::Error>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(phase = e.phase(), error = %e, "fetch failed");
            ExitCode::FAILURE
        }
    }
}

fn run<O: Write + ?Sized>(cli: &Cli, out: &mut O) -> Result<(), tlspump::Error> {
    let mut builder = ConfigBuilder::new()
        .port(cli.port)
        .repeat(cli.repeat)
        .buffer_size(cli.buffer_size)
        .backend(cli.backend.into());
    if let Some(path) = &cli.ca_file {
        builder = builder.ca_file(path);
    }
    let config = builder.build()?;

    let client_config = tls::client_config(config.ca_file.as_deref())?;
    let summary = tlspump::fetch(&config, &client_config, &cli.hostname, &cli.path, out)?;
    tracing::debug!(
        attempts = summary.attempts(),
        bytes = summary.plaintext_bytes(),
        "all attempts complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn two_positionals_required() {
        assert!(Cli::try_parse_from(["tlspump-fetch", "example.com"]).is_err());
        let cli = Cli::try_parse_from(["tlspump-fetch", "example.com", "/"]).unwrap();
        assert_eq!(cli.hostname, "example.com");
        assert_eq!(cli.path, "/");
        assert_eq!(cli.repeat, 3);
        assert_eq!(cli.port, 443);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "tlspump-fetch",
            "--repeat",
            "1",
            "--port",
            "8443",
            "--backend",
            "uring",
            "localhost",
            "/x",
        ])
        .unwrap();
        assert_eq!(cli.repeat, 1);
        assert_eq!(cli.port, 8443);
        assert_eq!(Backend::from(cli.backend), Backend::Uring);
    }

    #[test]
    fn help_is_not_a_usage_error() {
        let err = Cli::try_parse_from(["tlspump-fetch", "--help"]).err().unwrap();
        assert!(!err.use_stderr());
        let err = Cli::try_parse_from(["tlspump-fetch"]).err().unwrap();
        assert!(err.use_stderr());
    }

    #[test]
    fn refused_connection_exits_with_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let port = port.to_string();
        let cli = Cli::try_parse_from([
            "tlspump-fetch",
            "--port",
            port.as_str(),
            "127.0.0.1",
            "/",
        ])
        .unwrap();

        let mut out = Vec::new();
        let result = run(&cli, &mut out);
        assert!(
            matches!(result, Err(tlspump::Error::Connect { .. })),
            "{result:?}"
        );
        assert!(out.is_empty());
        assert_eq!(exit_code(result), ExitCode::FAILURE);
    }

    #[test]
    fn success_exits_zero() {
        assert_eq!(exit_code(Ok(())), ExitCode::SUCCESS);
    }
}
