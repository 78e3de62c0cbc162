use crate::config::retry::RetryPolicy;
use crate::crl::config::CrlConfig;
use crate::crl::crl_parser::ParsedCrl;
use crate::crl::disk_cache::DiskCache;
use crate::crl::error::{
    CrlDownloadSnafu, CrlError, EmptyCrlResponseSnafu, HttpClientBuildSnafu, MutexPoisonedSnafu,
};
use crate::http::retry::execute_bytes_with_retry;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use snafu::{ResultExt, ensure};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// One in-memory cache slot: the parsed, verified CRL plus the moment it was
/// downloaded (or promoted from disk).
#[derive(Debug, Clone)]
pub struct CachedCrl {
    pub crl: Arc<ParsedCrl>,
    pub download_time: DateTime<Utc>,
}

/// Two-tier CRL store with single-flight download de-duplication.
///
/// Lookup order is memory, then disk, then network. The in-memory map only
/// ever holds CRLs that parsed and verified against their expected issuer at
/// least once this process; the on-disk file is written only after a fresh
/// download passed the same checks.
#[derive(Debug)]
pub struct CrlCache {
    config: CrlConfig,
    memory_cache: Option<Mutex<HashMap<String, CachedCrl>>>,
    disk_cache: Option<DiskCache>,
    url_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    backoff: Mutex<HashMap<String, (u32, std::time::Instant)>>,
    http_client: reqwest::Client,
}

#[derive(Debug, Clone)]
struct CrlMetrics {
    get_total: Counter<u64>,
    get_ms: Histogram<u64>,
    fetch_total: Counter<u64>,
    fetch_ms: Histogram<u64>,
    fetch_error_total: Counter<u64>,
}

impl CrlMetrics {
    fn init(meter: &Meter) -> Self {
        Self {
            get_total: meter.u64_counter("crl_get_total").build(),
            get_ms: meter.u64_histogram("crl_get_ms").build(),
            fetch_total: meter.u64_counter("crl_fetch_total").build(),
            fetch_ms: meter.u64_histogram("crl_fetch_ms").build(),
            fetch_error_total: meter.u64_counter("crl_fetch_error_total").build(),
        }
    }
}

fn metrics() -> &'static CrlMetrics {
    static METRICS: OnceCell<CrlMetrics> = OnceCell::new();
    METRICS.get_or_init(|| {
        let meter = global::meter("crl_validator.crl");
        CrlMetrics::init(&meter)
    })
}

impl CrlCache {
    /// Build a cache with its own HTTP client, configured from the timeouts
    /// in `config`.
    pub fn new(config: CrlConfig) -> Result<Self, CrlError> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                config.http_timeout.num_seconds() as u64,
            ))
            .connect_timeout(std::time::Duration::from_secs(
                config.connection_timeout.num_seconds() as u64,
            ))
            .build()
            .context(HttpClientBuildSnafu)?;
        Ok(Self::with_client(config, http_client))
    }

    /// Build a cache around an injected HTTP client. The client owns its own
    /// request-level timeouts; the cache imposes none of its own.
    pub fn with_client(config: CrlConfig, http_client: reqwest::Client) -> Self {
        let memory_cache = config
            .enable_memory_caching
            .then(|| Mutex::new(HashMap::new()));
        let disk_cache = if config.enable_disk_caching {
            config.get_cache_dir().map(DiskCache::new)
        } else {
            None
        };
        Self {
            config,
            memory_cache,
            disk_cache,
            url_locks: Mutex::new(HashMap::new()),
            backoff: Mutex::new(HashMap::new()),
            http_client,
        }
    }

    /// Fetch the CRL for `url`, expected to be issued by `issuer_der`,
    /// consulting the memory and disk tiers before the network. Concurrent
    /// callers for the same URL share a single download.
    pub async fn get_crl(&self, url: &str, issuer_der: &[u8]) -> Result<Arc<ParsedCrl>, CrlError> {
        let start = std::time::Instant::now();
        if let Some(entry) = self.get_from_memory_cache(url)? {
            record_get(start, "memory");
            return Ok(entry.crl);
        }

        // Single-flight: whoever holds the per-URL lock does the work; the
        // rest block here and find the result in the memory tier on wake.
        let lock = self.get_url_lock(url)?;
        let _guard = lock.lock().await;
        if let Some(entry) = self.get_from_memory_cache(url)? {
            record_get(start, "memory");
            return Ok(entry.crl);
        }

        if let Some(crl) = self.promote_from_disk(url, issuer_der)? {
            record_get(start, "disk");
            return Ok(crl);
        }

        let fetched = self.fetch_from_network_and_cache(url, issuer_der).await?;
        record_get(start, "network");
        Ok(fetched)
    }

    /// Freshness requires both bounds: the CRL's own nextUpdate has not
    /// passed, and the entry is younger than the configured validity time.
    fn is_fresh(&self, entry: &CachedCrl, now: DateTime<Utc>) -> bool {
        let within_ttl = now - entry.download_time < self.config.cache_validity_time;
        let not_superseded = entry.crl.next_update.is_none_or(|next| now < next);
        within_ttl && not_superseded
    }

    fn get_from_memory_cache(&self, url: &str) -> Result<Option<CachedCrl>, CrlError> {
        let Some(memory) = &self.memory_cache else {
            return Ok(None);
        };
        let mut cache = memory.lock().map_err(|e| {
            MutexPoisonedSnafu {
                message: format!("in-memory CRL cache poisoned: {e}"),
            }
            .build()
        })?;
        if let Some(entry) = cache.get(url) {
            if self.is_fresh(entry, Utc::now()) {
                return Ok(Some(entry.clone()));
            }
            cache.remove(url);
        }
        Ok(None)
    }

    fn insert_memory(
        &self,
        url: &str,
        crl: Arc<ParsedCrl>,
        download_time: DateTime<Utc>,
    ) -> Result<(), CrlError> {
        let Some(memory) = &self.memory_cache else {
            return Ok(());
        };
        let mut cache = memory.lock().map_err(|e| {
            MutexPoisonedSnafu {
                message: format!("in-memory CRL cache poisoned: {e}"),
            }
            .build()
        })?;
        cache.insert(url.to_string(), CachedCrl { crl, download_time });
        Ok(())
    }

    /// Promote an on-disk entry into the memory tier. The file is only
    /// trusted if it parses, verifies against the expected issuer, and its
    /// nextUpdate has not passed; the file itself is never rewritten here
    /// and its mtime stays untouched.
    fn promote_from_disk(
        &self,
        url: &str,
        issuer_der: &[u8],
    ) -> Result<Option<Arc<ParsedCrl>>, CrlError> {
        let Some(disk) = &self.disk_cache else {
            return Ok(None);
        };
        let Some(bytes) = disk.read(url) else {
            return Ok(None);
        };
        let parsed = match ParsedCrl::parse(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(
                    target: "crl_validator::crl",
                    "Ignoring unparsable disk cache entry for {url}: {e}"
                );
                return Ok(None);
            }
        };
        if let Err(e) = parsed
            .verify_issued_by(issuer_der)
            .and_then(|_| parsed.verify_distribution_point(url))
        {
            tracing::debug!(
                target: "crl_validator::crl",
                "Ignoring unverifiable disk cache entry for {url}: {e}"
            );
            return Ok(None);
        }
        let now = Utc::now();
        if parsed.next_update.is_some_and(|next| now >= next) {
            tracing::debug!(target: "crl_validator::crl", "Disk cache entry expired for {url}, refetching");
            return Ok(None);
        }
        let crl = Arc::new(parsed);
        self.insert_memory(url, crl.clone(), now)?;
        Ok(Some(crl))
    }

    async fn fetch_from_network_and_cache(
        &self,
        url: &str,
        issuer_der: &[u8],
    ) -> Result<Arc<ParsedCrl>, CrlError> {
        let bytes = self.fetch(url).await?;
        ensure!(!bytes.is_empty(), EmptyCrlResponseSnafu { url });

        let parsed = ParsedCrl::parse(&bytes)?;
        parsed.verify_issued_by(issuer_der)?;
        parsed.verify_distribution_point(url)?;

        if let Some(disk) = &self.disk_cache
            && let Err(e) = disk.write_atomic(url, parsed.raw_der())
        {
            tracing::warn!(
                target: "crl_validator::crl",
                "Failed to write CRL cache to disk for {url}: {e}"
            );
        }
        let crl = Arc::new(parsed);
        self.insert_memory(url, crl.clone(), Utc::now())?;
        Ok(crl)
    }

    fn get_url_lock(&self, url: &str) -> Result<Arc<tokio::sync::Mutex<()>>, CrlError> {
        let mut locks = self.url_locks.lock().map_err(|e| {
            MutexPoisonedSnafu {
                message: format!("url_locks map poisoned: {e}"),
            }
            .build()
        })?;
        Ok(locks
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, CrlError> {
        let start = std::time::Instant::now();
        self.maybe_sleep_backoff(url).await?;

        let req_builder = || self.http_client.get(url);
        let bytes = match execute_bytes_with_retry(req_builder, &RetryPolicy::default()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                metrics().fetch_error_total.add(1, &[]);
                self.record_backoff_failure(url);
                return Err(e).context(CrlDownloadSnafu {
                    url: url.to_string(),
                });
            }
        };
        self.record_backoff_success(url)?;
        let ms = start.elapsed().as_millis() as u64;
        metrics().fetch_ms.record(ms, &[]);
        metrics().fetch_total.add(1, &[]);
        Ok(bytes)
    }

    async fn maybe_sleep_backoff(&self, url: &str) -> Result<(), CrlError> {
        let (failures, last) = {
            let guard = self.backoff.lock().map_err(|e| {
                MutexPoisonedSnafu {
                    message: format!("backoff map poisoned: {e}"),
                }
                .build()
            })?;
            guard
                .get(url)
                .cloned()
                .unwrap_or((0, std::time::Instant::now()))
        };
        if failures == 0 {
            return Ok(());
        }
        let base_ms = 100u64;
        let cap_ms = 5_000u64;
        let exp: u32 = failures.min(5u32);
        let factor = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor).min(cap_ms);
        let jitter = (rand::random::<u32>() % 100) as u64;
        let needed = std::time::Duration::from_millis(delay_ms + jitter);
        let elapsed = last.elapsed();
        if elapsed < needed {
            tokio::time::sleep(needed - elapsed).await;
        }
        Ok(())
    }

    fn record_backoff_success(&self, url: &str) -> Result<(), CrlError> {
        let mut guard = self.backoff.lock().map_err(|e| {
            MutexPoisonedSnafu {
                message: format!("backoff map poisoned: {e}"),
            }
            .build()
        })?;
        guard.remove(url);
        Ok(())
    }

    fn record_backoff_failure(&self, url: &str) {
        if let Ok(mut guard) = self.backoff.lock() {
            let entry = guard
                .entry(url.to_string())
                .or_insert((0, std::time::Instant::now()));
            entry.0 = entry.0.saturating_add(1);
            entry.1 = std::time::Instant::now();
        }
    }

    /// Evict in-memory entries older than the validity time and on-disk
    /// files past the additional removal grace period. Called by the
    /// periodic cleanup task.
    pub fn cleanup_stale_entries(&self) {
        let now = Utc::now();
        if let Some(memory) = &self.memory_cache
            && let Ok(mut cache) = memory.lock()
        {
            let before = cache.len();
            cache.retain(|_, entry| now - entry.download_time <= self.config.cache_validity_time);
            let evicted = before - cache.len();
            if evicted > 0 {
                tracing::debug!(
                    target: "crl_validator::crl",
                    "Evicted {evicted} stale in-memory CRL cache entries"
                );
            }
        }
        if let Some(disk) = &self.disk_cache {
            let grace = self.config.cache_validity_time + self.config.on_disk_cache_removal_delay;
            let Ok(grace) = grace.to_std() else {
                return;
            };
            let Some(cutoff) = SystemTime::now().checked_sub(grace) else {
                return;
            };
            let removed = disk.remove_older_than(cutoff);
            if removed > 0 {
                tracing::debug!(
                    target: "crl_validator::crl",
                    "Removed {removed} stale on-disk CRL cache files"
                );
            }
        }
    }
}

fn record_get(start: std::time::Instant, source: &'static str) {
    let ms = start.elapsed().as_millis() as u64;
    metrics()
        .get_ms
        .record(ms, &[KeyValue::new("source", source)]);
    metrics()
        .get_total
        .add(1, &[KeyValue::new("source", source)]);
}

#[cfg(test)]
impl CrlCache {
    pub(crate) fn test_insert_memory(
        &self,
        url: &str,
        crl: ParsedCrl,
        download_time: DateTime<Utc>,
    ) {
        self.insert_memory(url, Arc::new(crl), download_time)
            .expect("memory cache insert");
    }

    /// Raw slot lookup without the freshness check.
    pub(crate) fn test_memory_entry(&self, url: &str) -> Option<CachedCrl> {
        let memory = self.memory_cache.as_ref()?;
        memory.lock().unwrap().get(url).cloned()
    }

    pub(crate) fn test_memory_cache_present(&self) -> bool {
        self.memory_cache.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crl::test_helpers::pki;
    use chrono::Duration;

    fn test_cache(validity_minutes: i64) -> CrlCache {
        let config = CrlConfig {
            enable_memory_caching: true,
            enable_disk_caching: false,
            cache_validity_time: Duration::minutes(validity_minutes),
            ..Default::default()
        };
        CrlCache::with_client(config, reqwest::Client::new())
    }

    fn entry_with(
        this_update: chrono::DateTime<Utc>,
        next_update: chrono::DateTime<Utc>,
        download_time: chrono::DateTime<Utc>,
    ) -> CachedCrl {
        let ca = pki::create_ca(None, "freshness CA", None);
        let der = pki::create_crl_with(
            &ca,
            &[],
            pki::to_offset(this_update),
            pki::to_offset(next_update),
            None,
        );
        CachedCrl {
            crl: Arc::new(ParsedCrl::parse(&der).unwrap()),
            download_time,
        }
    }

    #[test]
    fn fresh_requires_both_ttl_and_next_update() {
        let cache = test_cache(10);
        let now = Utc::now();

        let fresh = entry_with(
            now - Duration::hours(1),
            now + Duration::hours(1),
            now - Duration::minutes(1),
        );
        assert!(cache.is_fresh(&fresh, now));

        // nextUpdate passed: stale no matter how recent the download
        let superseded = entry_with(
            now - Duration::hours(2),
            now - Duration::minutes(1),
            now - Duration::minutes(1),
        );
        assert!(!cache.is_fresh(&superseded, now));

        // download older than validity: stale despite valid nextUpdate
        let aged = entry_with(
            now - Duration::hours(2),
            now + Duration::hours(1),
            now - Duration::minutes(11),
        );
        assert!(!cache.is_fresh(&aged, now));
    }

    #[test]
    fn stale_memory_entry_is_evicted_on_read() {
        let cache = test_cache(10);
        let now = Utc::now();
        let url = "http://crl.example.com/root.crl";
        let stale = entry_with(
            now - Duration::hours(2),
            now - Duration::minutes(1),
            now - Duration::minutes(1),
        );
        cache.test_insert_memory(url, (*stale.crl).clone(), stale.download_time);

        assert!(cache.get_from_memory_cache(url).unwrap().is_none());
        assert!(cache.test_memory_entry(url).is_none());
    }

    #[test]
    fn memory_cache_is_absent_when_disabled() {
        let config = CrlConfig {
            enable_memory_caching: false,
            enable_disk_caching: false,
            ..Default::default()
        };
        let cache = CrlCache::with_client(config, reqwest::Client::new());
        assert!(!cache.test_memory_cache_present());
        assert!(
            cache
                .get_from_memory_cache("http://crl.example.com/root.crl")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn cleanup_evicts_only_past_validity() {
        let cache = test_cache(10);
        let now = Utc::now();
        let keep_url = "http://crl.example.com/keep.crl";
        let evict_url = "http://crl.example.com/evict.crl";
        let keep = entry_with(
            now - Duration::hours(1),
            now + Duration::hours(1),
            now - Duration::minutes(5),
        );
        let evict = entry_with(
            now - Duration::hours(1),
            now + Duration::hours(1),
            now - Duration::minutes(15),
        );
        cache.test_insert_memory(keep_url, (*keep.crl).clone(), keep.download_time);
        cache.test_insert_memory(evict_url, (*evict.crl).clone(), evict.download_time);

        cache.cleanup_stale_entries();

        assert!(cache.test_memory_entry(keep_url).is_some());
        assert!(cache.test_memory_entry(evict_url).is_none());
    }

    #[tokio::test]
    async fn url_locks_are_shared_per_url() {
        let cache = test_cache(10);
        let a1 = cache.get_url_lock("http://crl.example.com/a.crl").unwrap();
        let a2 = cache.get_url_lock("http://crl.example.com/a.crl").unwrap();
        let b = cache.get_url_lock("http://crl.example.com/b.crl").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
