use crate::tls::CrlServerCertVerifier;
use crate::tls::config::TlsConfig;
use crate::tls::error::{ClientBuildSnafu, PemParseSnafu, TlsError, VerifierBuildSnafu};
use reqwest::Client;
use snafu::ResultExt;
use std::sync::Arc;

/// Build a reqwest client whose TLS handshakes run the CRL verifier.
pub fn create_tls_client_with_config(cfg: TlsConfig) -> Result<Client, TlsError> {
    if !cfg.verify_certificates {
        return Client::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(!cfg.verify_hostname)
            .build()
            .context(ClientBuildSnafu);
    }

    // Install aws-lc-rs provider (idempotent)
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let custom_roots = if let Some(pem_path) = cfg.custom_root_store_path.as_ref() {
        let pem_data = std::fs::read(pem_path).context(PemParseSnafu)?;
        Some(load_root_ders_from_pem(&pem_data)?)
    } else {
        None
    };

    let crl_verifier = CrlServerCertVerifier::new(cfg.crl_config.clone(), custom_roots)
        .context(VerifierBuildSnafu)?;

    let tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(crl_verifier))
        .with_no_client_auth();

    Client::builder()
        .use_preconfigured_tls(tls_config)
        .timeout(std::time::Duration::from_secs(
            cfg.crl_config.http_timeout.num_seconds() as u64,
        ))
        .connect_timeout(std::time::Duration::from_secs(
            cfg.crl_config.connection_timeout.num_seconds() as u64,
        ))
        .danger_accept_invalid_hostnames(!cfg.verify_hostname)
        .build()
        .context(ClientBuildSnafu)
}

/// Parse PEM data into the DER certificates of a root store.
pub fn load_root_ders_from_pem(pem_data: &[u8]) -> Result<Vec<Vec<u8>>, TlsError> {
    use std::io::Cursor;
    let mut cursor = Cursor::new(pem_data);
    let certs = rustls_pemfile::certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .context(PemParseSnafu)?;
    if certs.is_empty() {
        return Err(TlsError::PemParse {
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "no certs in PEM"),
            location: snafu::Location::new(file!(), line!(), 0),
        });
    }
    Ok(certs.into_iter().map(|c| c.as_ref().to_vec()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crl::config::{CertRevocationCheckMode, CrlConfig};

    #[test]
    fn client_builds_in_every_check_mode() {
        for check_mode in [
            CertRevocationCheckMode::Disabled,
            CertRevocationCheckMode::Enabled,
            CertRevocationCheckMode::Advisory,
        ] {
            let cfg = TlsConfig {
                crl_config: CrlConfig {
                    check_mode,
                    ..Default::default()
                },
                ..Default::default()
            };
            let client = create_tls_client_with_config(cfg).unwrap();
            assert!(client.get("https://example.com/").build().is_ok());
        }
    }

    #[test]
    fn insecure_client_skips_verification_setup() {
        let client = create_tls_client_with_config(TlsConfig::insecure()).unwrap();
        assert!(client.get("https://example.com/").build().is_ok());
    }

    #[test]
    fn pem_parsing_rejects_empty_input() {
        assert!(load_root_ders_from_pem(b"").is_err());
        assert!(load_root_ders_from_pem(b"not pem at all").is_err());
    }
}
