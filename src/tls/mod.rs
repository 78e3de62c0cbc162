pub mod client;
pub mod config;
pub mod error;
pub mod verifier;
pub mod x509_utils;

pub use client::{create_tls_client_with_config, load_root_ders_from_pem};
pub use config::TlsConfig;
pub use error::TlsError;
pub use verifier::CrlServerCertVerifier;
pub use x509_utils::build_candidate_chains;
