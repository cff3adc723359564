use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::CertificateDer;
use tracing::debug;

use crate::error::Error;

/// Build the process-wide client configuration.
///
/// Trust anchors come from `ca_file` when given, otherwise from the bundled
/// webpki roots. The returned config is never mutated afterwards; its default
/// in-memory session store lets later connections resume earlier sessions.
pub fn client_config(ca_file: Option<&Path>) -> Result<Arc<rustls::ClientConfig>, Error> {
    let roots = root_store(ca_file)?;
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Build a client configuration trusting exactly `certs`.
pub fn client_config_with_roots(
    certs: &[CertificateDer<'static>],
) -> Result<Arc<rustls::ClientConfig>, Error> {
    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert.clone())
            .map_err(|e| Error::Config(format!("bad trust anchor: {e}")))?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

fn root_store(ca_file: Option<&Path>) -> Result<RootCertStore, Error> {
    let mut roots = RootCertStore::empty();
    let Some(path) = ca_file else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(roots);
    };

    let ca_err = |source| Error::CaFile {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(ca_err)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(ca_err)?;
    let (added, ignored) = roots.add_parsable_certificates(certs);
    debug!(path = %path.display(), added, ignored, "loaded trust anchors");
    if added == 0 {
        return Err(ca_err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no usable certificates",
        )));
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_roots_are_loaded() {
        let roots = root_store(None).unwrap();
        assert!(!roots.is_empty());
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let err = client_config(Some(Path::new("/nonexistent/ca.pem"))).unwrap_err();
        assert!(matches!(err, Error::CaFile { .. }));
        assert_eq!(err.phase(), "config");
    }

    #[test]
    fn ca_file_from_pem() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let path = std::env::temp_dir().join(format!("tlspump-ca-{}.pem", std::process::id()));
        std::fs::write(&path, cert.cert.pem()).unwrap();

        let roots = root_store(Some(&path)).unwrap();
        assert_eq!(roots.len(), 1);
        client_config(Some(&path)).unwrap();

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn pem_without_certificates_rejected() {
        let path = std::env::temp_dir().join(format!("tlspump-empty-{}.pem", std::process::id()));
        std::fs::write(&path, "not a certificate\n").unwrap();

        let err = root_store(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::CaFile { .. }));

        std::fs::remove_file(&path).unwrap();
    }
}
