use snafu::{Location, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum CrlError {
    #[snafu(display("Failed to download CRL from URL: {url}"))]
    CrlDownload {
        url: String,
        source: crate::http::retry::HttpError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("CRL response from {url} was empty"))]
    EmptyCrlResponse {
        url: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to parse CRL data"))]
    CrlParsing {
        source: x509_parser::nom::Err<x509_parser::error::X509Error>,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to parse certificate"))]
    CertificateParsing {
        source: x509_parser::nom::Err<x509_parser::error::X509Error>,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Invalid time in certificate or CRL"))]
    InvalidTime {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Invalid CRL signature"))]
    InvalidCrlSignature {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("CRL issuer does not match certificate issuer"))]
    CrlIssuerMismatch {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("distribution point {url} not found in CRL IDP extension"))]
    IdpMismatch {
        url: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Certificate has no CRL distribution points"))]
    NoCrlDistributionPoints {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to write CRL to disk cache"))]
    DiskCacheWrite {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to create cache directory"))]
    CacheDirectoryCreation {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Mutex poisoned: {message}"))]
    MutexPoisoned {
        message: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to build HTTP client for CRL requests"))]
    HttpClientBuild {
        source: reqwest::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("every verified certificate chain contained revoked certificates"))]
    AllChainsRevoked {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("certificate revocation check failed"))]
    RevocationCheckFailed {
        #[snafu(implicit)]
        location: Location,
    },
}
