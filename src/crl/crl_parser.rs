use crate::crl::certificate_parser::{asn1_time_to_datetime, canonical_serial};
use crate::crl::error::{
    CertificateParsingSnafu, CrlError, CrlIssuerMismatchSnafu, CrlParsingSnafu,
    IdpMismatchSnafu, InvalidCrlSignatureSnafu, InvalidTimeSnafu,
};
use chrono::{DateTime, Utc};
use snafu::{ResultExt, ensure};
use std::collections::HashSet;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::*;

/// A CRL parsed into the pieces revocation checking needs, together with the
/// raw DER it came from. The raw bytes are kept so the on-disk cache stores
/// exactly what was fetched.
#[derive(Debug, Clone)]
pub struct ParsedCrl {
    raw: Vec<u8>,
    issuer_name_der: Vec<u8>,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    revoked_serials: HashSet<Vec<u8>>,
    /// Full-name URIs of the Issuing Distribution Point extension,
    /// `None` when the CRL carries no IDP extension.
    idp_urls: Option<Vec<String>>,
}

impl ParsedCrl {
    pub fn parse(crl_der: &[u8]) -> Result<Self, CrlError> {
        let (_, crl) = x509_parser::revocation_list::CertificateRevocationList::from_der(crl_der)
            .context(CrlParsingSnafu)?;

        let this_update = asn1_time_to_datetime(&crl.last_update())
            .ok_or_else(|| InvalidTimeSnafu.build())?;
        let next_update = match crl.tbs_cert_list.next_update {
            Some(t) => Some(asn1_time_to_datetime(&t).ok_or_else(|| InvalidTimeSnafu.build())?),
            None => None,
        };

        let revoked_serials = crl
            .iter_revoked_certificates()
            .map(|revoked| canonical_serial(revoked.raw_serial()))
            .collect();

        Ok(Self {
            raw: crl_der.to_vec(),
            issuer_name_der: crl.tbs_cert_list.issuer.as_raw().to_vec(),
            this_update,
            next_update,
            revoked_serials,
            idp_urls: extract_idp_urls(&crl),
        })
    }

    pub fn raw_der(&self) -> &[u8] {
        &self.raw
    }

    /// Check that this CRL was issued and signed by the given certificate:
    /// the CRL issuer Name must equal the certificate subject Name byte for
    /// byte, and the CRL signature must verify against the certificate key.
    pub fn verify_issued_by(&self, issuer_cert_der: &[u8]) -> Result<(), CrlError> {
        let (_, issuer) = x509_parser::certificate::X509Certificate::from_der(issuer_cert_der)
            .context(CertificateParsingSnafu)?;
        ensure!(
            issuer.tbs_certificate.subject.as_raw() == self.issuer_name_der.as_slice(),
            CrlIssuerMismatchSnafu
        );

        let (_, crl) = x509_parser::revocation_list::CertificateRevocationList::from_der(&self.raw)
            .context(CrlParsingSnafu)?;
        if crl.verify_signature(issuer.public_key()).is_err() {
            return InvalidCrlSignatureSnafu {}.fail();
        }
        Ok(())
    }

    /// Enforce the Issuing Distribution Point scope: when the extension is
    /// present, the URL the CRL was fetched from must be one of its
    /// full-name URIs. CRLs without the extension are unrestricted.
    pub fn verify_distribution_point(&self, url: &str) -> Result<(), CrlError> {
        match &self.idp_urls {
            None => Ok(()),
            Some(urls) if urls.iter().any(|u| u == url) => Ok(()),
            Some(_) => IdpMismatchSnafu { url }.fail(),
        }
    }

    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        self.revoked_serials.contains(&canonical_serial(serial))
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked_serials.len()
    }

    pub fn has_idp_extension(&self) -> bool {
        self.idp_urls.is_some()
    }
}

fn extract_idp_urls(
    crl: &x509_parser::revocation_list::CertificateRevocationList<'_>,
) -> Option<Vec<String>> {
    for ext in crl.tbs_cert_list.extensions() {
        if let ParsedExtension::IssuingDistributionPoint(idp) = ext.parsed_extension() {
            let urls = match &idp.distribution_point {
                Some(DistributionPointName::FullName(names)) => names
                    .iter()
                    .filter_map(|general_name| match general_name {
                        GeneralName::URI(uri) => Some(uri.to_string()),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            };
            return Some(urls);
        }
    }
    None
}
