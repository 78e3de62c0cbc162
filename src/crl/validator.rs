use crate::crl::cache::CrlCache;
use crate::crl::certificate_parser;
use crate::crl::config::{CertRevocationCheckMode, CrlConfig};
use crate::crl::error::{AllChainsRevokedSnafu, CrlError, RevocationCheckFailedSnafu};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

/// Disposition of one candidate chain (and of one (subject, issuer) pair
/// within it). Revoked dominates, then error, then ok.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainVerdict {
    Ok,
    Revoked,
    Error,
}

struct CleanupTask {
    stop_tx: mpsc::Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

/// Revocation-checking hook for TLS peer verification.
///
/// `verify_peer_certificates` is handed the candidate chains the TLS stack
/// already verified and decides whether the handshake may proceed, fetching
/// CRLs through the two-tier cache as needed.
pub struct CrlValidator {
    config: CrlConfig,
    cache: Arc<CrlCache>,
    cleanup: Mutex<Option<CleanupTask>>,
}

impl std::fmt::Debug for CrlValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrlValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CrlValidator {
    pub fn new(config: CrlConfig) -> Result<Self, CrlError> {
        let cache = Arc::new(CrlCache::new(config.clone())?);
        Ok(Self {
            config,
            cache,
            cleanup: Mutex::new(None),
        })
    }

    /// Like [`CrlValidator::new`] but with an injected HTTP client; the
    /// client owns request-level timeouts.
    pub fn new_with_client(config: CrlConfig, http_client: reqwest::Client) -> Self {
        let cache = Arc::new(CrlCache::with_client(config.clone(), http_client));
        Self {
            config,
            cache,
            cleanup: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CrlConfig {
        &self.config
    }

    /// Entry point invoked during TLS handshake. `_raw_certs` is the wire
    /// order presented by the peer and is not consulted; `verified_chains`
    /// are the candidate chains produced by chain verification, each ordered
    /// `[leaf, intermediates.., root]`.
    ///
    /// Returns `Ok(())` if any chain passes revocation checking. When no
    /// chain passes, a revoked chain outweighs chains that merely failed to
    /// check: revocation is enforced even in advisory mode, while unknown
    /// revocation state is only fatal in enforced mode.
    pub async fn verify_peer_certificates(
        &self,
        _raw_certs: &[Vec<u8>],
        verified_chains: &[Vec<Vec<u8>>],
    ) -> Result<(), CrlError> {
        if self.config.check_mode == CertRevocationCheckMode::Disabled {
            return Ok(());
        }

        let mut any_revoked = false;
        for chain in verified_chains {
            match self.validate_chain(chain).await {
                ChainVerdict::Ok => return Ok(()),
                ChainVerdict::Revoked => any_revoked = true,
                ChainVerdict::Error => {}
            }
        }

        if any_revoked {
            tracing::error!(
                target: "crl_validator::crl",
                "CRL validation failed: all candidate chains revoked or unverifiable"
            );
            return AllChainsRevokedSnafu.fail();
        }
        match self.config.check_mode {
            CertRevocationCheckMode::Enabled => {
                tracing::error!(target: "crl_validator::crl", "CRL validation failed");
                RevocationCheckFailedSnafu.fail()
            }
            CertRevocationCheckMode::Advisory => {
                tracing::warn!(
                    target: "crl_validator::crl",
                    "CRL validation errors but no revoked chain; allowing (advisory)"
                );
                Ok(())
            }
            CertRevocationCheckMode::Disabled => Ok(()),
        }
    }

    /// Walk the issuer links of one chain. The root itself is never
    /// revocation-checked; only `(subject, issuer)` pairs below it are.
    pub(crate) async fn validate_chain(&self, chain: &[Vec<u8>]) -> ChainVerdict {
        let mut saw_error = false;
        for pair in chain.windows(2) {
            match self.check_pair(&pair[0], &pair[1]).await {
                ChainVerdict::Ok => {}
                ChainVerdict::Revoked => return ChainVerdict::Revoked,
                ChainVerdict::Error => saw_error = true,
            }
        }
        if saw_error {
            ChainVerdict::Error
        } else {
            ChainVerdict::Ok
        }
    }

    async fn check_pair(&self, subject: &[u8], issuer: &[u8]) -> ChainVerdict {
        match certificate_parser::is_short_lived_certificate(subject) {
            Ok(true) => return ChainVerdict::Ok,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    target: "crl_validator::crl",
                    "Failed to read certificate validity: {e}"
                );
                return ChainVerdict::Error;
            }
        }

        let urls = match certificate_parser::extract_crl_distribution_points(subject) {
            Ok(urls) => urls,
            Err(e) => {
                tracing::warn!(
                    target: "crl_validator::crl",
                    "Failed to extract CRL distribution points: {e}"
                );
                return ChainVerdict::Error;
            }
        };
        if urls.is_empty() {
            return if self.config.allow_certificates_without_crl_url {
                ChainVerdict::Ok
            } else {
                tracing::debug!(
                    target: "crl_validator::crl",
                    "Certificate has no CRL distribution points"
                );
                ChainVerdict::Error
            };
        }

        let serial = match certificate_parser::get_certificate_serial_number(subject) {
            Ok(serial) => serial,
            Err(e) => {
                tracing::warn!(
                    target: "crl_validator::crl",
                    "Failed to read certificate serial: {e}"
                );
                return ChainVerdict::Error;
            }
        };

        // First distribution point that yields a verified CRL decides.
        for url in &urls {
            match self.cache.get_crl(url, issuer).await {
                Ok(crl) => {
                    return if crl.is_revoked(&serial) {
                        let serial_hex = hex::encode(&serial);
                        tracing::warn!(
                            target: "crl_validator::crl",
                            "Certificate with serial {serial_hex} found in CRL revocation list"
                        );
                        ChainVerdict::Revoked
                    } else {
                        ChainVerdict::Ok
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        target: "crl_validator::crl",
                        "Failed to obtain CRL from {url}: {e}"
                    );
                }
            }
        }
        ChainVerdict::Error
    }

    /// Start the periodic cache cleanup task. A no-op when already running.
    pub fn start_periodic_cache_cleanup(&self, tick: Duration) {
        let Ok(mut guard) = self.cleanup.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name("crl-cache-cleanup".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(tick) {
                        Err(mpsc::RecvTimeoutError::Timeout) => cache.cleanup_stale_entries(),
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            });
        match spawned {
            Ok(handle) => *guard = Some(CleanupTask { stop_tx, handle }),
            Err(e) => {
                tracing::error!(
                    target: "crl_validator::crl",
                    "Failed to spawn CRL cache cleanup thread: {e}"
                );
            }
        }
    }

    /// Stop the cleanup task. Blocks until a cleanup pass in progress has
    /// finished and the thread has exited.
    pub fn stop_periodic_cache_cleanup(&self) {
        let task = self.cleanup.lock().ok().and_then(|mut guard| guard.take());
        if let Some(task) = task {
            let _ = task.stop_tx.send(());
            let _ = task.handle.join();
        }
    }
}

impl Drop for CrlValidator {
    fn drop(&mut self) {
        self.stop_periodic_cache_cleanup();
    }
}

#[cfg(test)]
impl CrlValidator {
    pub(crate) fn cache(&self) -> &CrlCache {
        &self.cache
    }
}
