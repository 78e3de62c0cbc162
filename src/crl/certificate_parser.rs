use crate::crl::error::{CertificateParsingSnafu, CrlError, InvalidTimeSnafu};
use chrono::{DateTime, TimeZone, Utc};
use snafu::ResultExt;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::*;

/// Extract CRL distribution points from a DER-encoded certificate.
/// Only absolute HTTP(S) URLs are recognized; other schemes are ignored.
pub fn extract_crl_distribution_points(cert_der: &[u8]) -> Result<Vec<String>, CrlError> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(cert_der)
        .context(CertificateParsingSnafu)?;

    let crl_urls: Vec<String> = cert
        .extensions()
        .iter()
        .filter_map(|ext| match ext.parsed_extension() {
            ParsedExtension::CRLDistributionPoints(points) => Some(points.points.iter()),
            _ => None,
        })
        .flatten()
        .filter_map(|point| point.distribution_point.as_ref())
        .filter_map(|name| match name {
            x509_parser::extensions::DistributionPointName::FullName(names) => Some(names.iter()),
            _ => None,
        })
        .flatten()
        .filter_map(|general_name| match general_name {
            GeneralName::URI(uri) => Some(uri.to_string()),
            _ => None,
        })
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .collect();

    if crl_urls.is_empty() {
        tracing::debug!("No CRL distribution points found in certificate");
    } else {
        let count = crl_urls.len();
        tracing::debug!("Found {count} CRL distribution points: {crl_urls:?}");
    }

    Ok(crl_urls)
}

/// Get certificate serial number as canonical big-endian bytes for CRL
/// comparison.
pub fn get_certificate_serial_number(cert_der: &[u8]) -> Result<Vec<u8>, CrlError> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(cert_der)
        .context(CertificateParsingSnafu)?;
    Ok(canonical_serial(&cert.serial.to_bytes_be()))
}

/// Strip DER high-bit padding so serial comparison is value-based.
pub(crate) fn canonical_serial(raw: &[u8]) -> Vec<u8> {
    let first_nonzero = raw
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(raw.len().saturating_sub(1));
    raw[first_nonzero..].to_vec()
}

/// Get (notBefore, notAfter) as chrono::DateTime<Utc>.
pub fn get_certificate_validity(
    cert_der: &[u8],
) -> Result<(DateTime<Utc>, DateTime<Utc>), CrlError> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(cert_der)
        .context(CertificateParsingSnafu)?;
    let not_before =
        asn1_time_to_datetime(&cert.validity.not_before).ok_or_else(|| InvalidTimeSnafu.build())?;
    let not_after =
        asn1_time_to_datetime(&cert.validity.not_after).ok_or_else(|| InvalidTimeSnafu.build())?;
    Ok((not_before, not_after))
}

/// Whether a certificate is exempt from CRL checking because it is
/// short-lived under the CA/B Forum ballot: certificates issued on or after
/// 2024-03-15 with a lifetime of at most 10 days (7 days once issuance moves
/// past 2026-03-15). The lifetime bound is inclusive.
pub fn is_short_lived_certificate(cert_der: &[u8]) -> Result<bool, CrlError> {
    let (not_before, not_after) = get_certificate_validity(cert_der)?;

    let policy_start = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
    if not_before < policy_start {
        return Ok(false);
    }

    let transition = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
    let threshold_days = if not_before < transition { 10 } else { 7 };

    let is_short_lived = not_after - not_before <= chrono::Duration::days(threshold_days);
    if is_short_lived {
        let days = (not_after - not_before).num_days();
        tracing::debug!("Certificate is short-lived ({days} days), skipping CRL check");
    }
    Ok(is_short_lived)
}

/// Convert ASN.1 time to chrono DateTime
pub(crate) fn asn1_time_to_datetime(
    asn1_time: &x509_parser::time::ASN1Time,
) -> Option<DateTime<Utc>> {
    // x509-parser exposes to_datetime() returning time::OffsetDateTime
    let dt = asn1_time.to_datetime();
    let ts = dt.unix_timestamp();
    DateTime::<Utc>::from_timestamp(ts, 0)
}
