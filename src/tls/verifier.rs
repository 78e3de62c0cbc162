use crate::crl::config::{CertRevocationCheckMode, CrlConfig};
use crate::crl::validator::CrlValidator;
use crate::crl::worker::CrlWorker;
use crate::tls::x509_utils::build_candidate_chains;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use std::sync::Arc;

/// rustls server-certificate verifier that runs standard WebPKI chain
/// verification first and then applies CRL revocation checking to the
/// candidate chains.
#[derive(Debug)]
pub struct CrlServerCertVerifier {
    webpki_verifier: Arc<WebPkiServerVerifier>,
    crl_validator: Arc<CrlValidator>,
    crl_config: CrlConfig,
    /// DER of the configured roots, kept so candidate chains can be anchored
    /// with the issuing certificate of the topmost intermediate. Empty when
    /// only trust anchors (no full certificates) are available; chains then
    /// end at the last presented intermediate.
    root_ders: Vec<Vec<u8>>,
}

impl CrlServerCertVerifier {
    pub fn new(
        crl_config: CrlConfig,
        custom_roots: Option<Vec<Vec<u8>>>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let (root_store, root_ders) = match custom_roots {
            Some(ders) => {
                let mut store = rustls::RootCertStore::empty();
                let certs: Vec<CertificateDer<'static>> = ders
                    .iter()
                    .map(|der| CertificateDer::from(der.clone()))
                    .collect();
                let (_added, _ignored) = store.add_parsable_certificates(certs);
                (store, ders)
            }
            None => {
                let mut store = rustls::RootCertStore::empty();
                store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                (store, Vec::new())
            }
        };
        let webpki_verifier = WebPkiServerVerifier::builder(Arc::new(root_store)).build()?;
        let crl_validator = Arc::new(CrlValidator::new(crl_config.clone())?);
        Ok(Self {
            webpki_verifier,
            crl_validator,
            crl_config,
            root_ders,
        })
    }
}

impl ServerCertVerifier for CrlServerCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        self.webpki_verifier.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;
        if self.crl_config.check_mode == CertRevocationCheckMode::Disabled {
            return Ok(ServerCertVerified::assertion());
        }

        let inters: Vec<Vec<u8>> = intermediates.iter().map(|c| c.as_ref().to_vec()).collect();
        let chains = build_candidate_chains(end_entity.as_ref(), &inters, &self.root_ders);

        let worker = CrlWorker::global();
        match worker.validate(Arc::clone(&self.crl_validator), chains) {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(e) => {
                tracing::error!(target: "crl_validator::tls", "CRL validation failed: {e}");
                Err(TlsError::General(e.to_string()))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.webpki_verifier
            .verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.webpki_verifier
            .verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki_verifier.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crl::test_helpers::pki;
    use crate::crl::test_helpers::server::CrlTestServer;

    fn test_setup() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(|| {
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        });
        crate::test_utils::setup_logging();
    }

    fn verify(
        verifier: &CrlServerCertVerifier,
        leaf: &[u8],
        intermediates: &[Vec<u8>],
    ) -> Result<ServerCertVerified, TlsError> {
        let ee = CertificateDer::from(leaf.to_vec());
        let inters: Vec<CertificateDer<'static>> = intermediates
            .iter()
            .map(|der| CertificateDer::from(der.clone()))
            .collect();
        let server_name = ServerName::try_from("test.example.com").unwrap();
        verifier.verify_server_cert(&ee, &inters, &server_name, &[], UnixTime::now())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disabled_mode_accepts_without_crl_io() {
        test_setup();
        let server = CrlTestServer::start().await;
        let ca = pki::create_ca(None, "verifier root", None);
        let leaf = pki::create_leaf(&ca, Some(&server.url("/rootCrl")));

        let crl_config = CrlConfig {
            check_mode: CertRevocationCheckMode::Disabled,
            ..Default::default()
        };
        let verifier =
            Arc::new(CrlServerCertVerifier::new(crl_config, Some(vec![ca.der()])).unwrap());

        let result = tokio::task::spawn_blocking(move || verify(&verifier, &leaf, &[]))
            .await
            .unwrap();
        result.unwrap();
        assert_eq!(server.hits(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn revoked_leaf_fails_even_in_advisory() {
        test_setup();
        let server = CrlTestServer::start().await;
        let ca = pki::create_ca(None, "verifier root", None);
        let leaf = pki::create_leaf(&ca, Some(&server.url("/rootCrl")));
        server.serve("/rootCrl", pki::create_crl(&ca, &[&leaf]));

        let crl_config = CrlConfig {
            check_mode: CertRevocationCheckMode::Advisory,
            enable_disk_caching: false,
            ..Default::default()
        };
        let verifier =
            Arc::new(CrlServerCertVerifier::new(crl_config, Some(vec![ca.der()])).unwrap());

        let result = tokio::task::spawn_blocking(move || verify(&verifier, &leaf, &[]))
            .await
            .unwrap();
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("revoked"),
            "revocation must fail the handshake in advisory mode: {err}"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn clean_chain_passes_enabled_mode() {
        test_setup();
        let server = CrlTestServer::start().await;
        let ca = pki::create_ca(None, "verifier root", None);
        server.serve("/rootCrl", pki::create_crl(&ca, &[]));
        let leaf = pki::create_leaf(&ca, Some(&server.url("/rootCrl")));

        let crl_config = CrlConfig {
            check_mode: CertRevocationCheckMode::Enabled,
            enable_disk_caching: false,
            ..Default::default()
        };
        let verifier =
            Arc::new(CrlServerCertVerifier::new(crl_config, Some(vec![ca.der()])).unwrap());

        let result = tokio::task::spawn_blocking(move || verify(&verifier, &leaf, &[]))
            .await
            .unwrap();
        result.unwrap();
    }
}
