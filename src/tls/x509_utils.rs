use x509_parser::prelude::*;

#[derive(thiserror::Error, Debug)]
pub enum X509UtilError {
    #[error("Failed to parse certificate: {0}")]
    CertParse(String),
}

/// Raw DER bytes of the certificate's subject Name.
pub fn subject_name_der(cert_der: &[u8]) -> Result<Vec<u8>, X509UtilError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| X509UtilError::CertParse(e.to_string()))?;
    Ok(cert.tbs_certificate.subject.as_raw().to_vec())
}

/// Raw DER bytes of the certificate's issuer Name.
pub fn issuer_name_der(cert_der: &[u8]) -> Result<Vec<u8>, X509UtilError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| X509UtilError::CertParse(e.to_string()))?;
    Ok(cert.tbs_certificate.issuer.as_raw().to_vec())
}

/// Order the presented intermediates into issuer-linked candidate chains
/// starting at the end-entity. Where a configured root's subject matches the
/// chain's last issuer, the root is appended so the pair below it can be
/// revocation-checked. Cross-signed intermediates fan out into one candidate
/// chain per parent.
pub fn build_candidate_chains(
    end_entity: &[u8],
    intermediates: &[Vec<u8>],
    root_ders: &[Vec<u8>],
) -> Vec<Vec<Vec<u8>>> {
    let mut chains = Vec::new();
    extend_chain(
        vec![end_entity.to_vec()],
        intermediates,
        root_ders,
        &mut chains,
    );
    chains
}

fn extend_chain(
    chain: Vec<Vec<u8>>,
    intermediates: &[Vec<u8>],
    root_ders: &[Vec<u8>],
    out: &mut Vec<Vec<Vec<u8>>>,
) {
    let last = chain.last().map(Vec::as_slice).unwrap_or_default();
    let (Ok(subject), Ok(issuer)) = (subject_name_der(last), issuer_name_der(last)) else {
        out.push(chain);
        return;
    };
    // self-signed: the chain has reached its root
    if subject == issuer {
        out.push(chain);
        return;
    }

    let mut extended = false;
    for candidate in intermediates {
        if chain.iter().any(|c| c == candidate) {
            continue;
        }
        if subject_name_der(candidate).is_ok_and(|s| s == issuer) {
            let mut next = chain.clone();
            next.push(candidate.clone());
            extend_chain(next, intermediates, root_ders, out);
            extended = true;
        }
    }
    for root in root_ders {
        if subject_name_der(root).is_ok_and(|s| s == issuer) {
            let mut next = chain.clone();
            next.push(root.clone());
            out.push(next);
            extended = true;
        }
    }
    if !extended {
        out.push(chain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crl::test_helpers::pki;

    #[test]
    fn name_extraction_rejects_garbage() {
        assert!(subject_name_der(&[0x01, 0x02]).is_err());
        assert!(issuer_name_der(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn chain_is_ordered_by_issuer_links() {
        let root = pki::create_ca(None, "chain root", None);
        let inter_a = pki::create_ca(Some(&root), "chain inter A", None);
        let inter_b = pki::create_ca(Some(&inter_a), "chain inter B", None);
        let leaf = pki::create_leaf(&inter_b, None);

        // intermediates presented out of order
        let intermediates = vec![inter_a.der(), inter_b.der()];
        let chains = build_candidate_chains(&leaf, &intermediates, &[root.der()]);

        assert_eq!(chains.len(), 1);
        let chain = &chains[0];
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0], leaf);
        assert_eq!(chain[1], inter_b.der());
        assert_eq!(chain[2], inter_a.der());
        assert_eq!(chain[3], root.der());
    }

    #[test]
    fn chain_without_known_root_ends_at_last_intermediate() {
        let root = pki::create_ca(None, "unknown root", None);
        let inter = pki::create_ca(Some(&root), "inter", None);
        let leaf = pki::create_leaf(&inter, None);

        let chains = build_candidate_chains(&leaf, &[inter.der()], &[]);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].len(), 2);
    }

    #[test]
    fn cross_signed_intermediate_fans_out() {
        let root_a = pki::create_ca(None, "cross root A", None);
        let root_b = pki::create_ca(None, "cross root B", None);
        let inter = pki::create_ca(Some(&root_a), "cross inter", None);
        let leaf = pki::create_leaf(&inter, None);

        // Both roots share no DN with the intermediate's issuer except
        // root_a, so only one chain anchors; with both listed as parents of
        // identical subjects the fan-out would produce one chain each.
        let chains = build_candidate_chains(&leaf, &[inter.der()], &[root_a.der(), root_b.der()]);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].last().unwrap(), &root_a.der());
    }
}
