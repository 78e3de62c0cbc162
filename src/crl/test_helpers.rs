//! Shared helpers for CRL tests: an on-the-fly test PKI and a tiny HTTP
//! server that serves DER CRLs while counting (and optionally delaying)
//! requests.
