use crate::config::ConfigError;
use crate::config::settings::Settings;
use chrono::Duration;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertRevocationCheckMode {
    Disabled,
    Enabled,
    Advisory,
}

impl Default for CertRevocationCheckMode {
    fn default() -> Self {
        Self::Disabled
    }
}

#[derive(Debug, Clone)]
pub struct CrlConfig {
    pub check_mode: CertRevocationCheckMode,
    pub allow_certificates_without_crl_url: bool,
    /// Upper bound on how long a downloaded CRL is served from cache,
    /// regardless of its own nextUpdate.
    pub cache_validity_time: Duration,
    pub enable_memory_caching: bool,
    pub enable_disk_caching: bool,
    pub cache_dir: Option<PathBuf>,
    /// Grace period added to `cache_validity_time` before an on-disk entry
    /// is removed, to tolerate concurrent readers of the file.
    pub on_disk_cache_removal_delay: Duration,
    pub http_timeout: Duration,
    pub connection_timeout: Duration,
}

impl Default for CrlConfig {
    fn default() -> Self {
        Self {
            check_mode: CertRevocationCheckMode::Disabled,
            allow_certificates_without_crl_url: false,
            cache_validity_time: Duration::days(1),
            enable_memory_caching: true,
            enable_disk_caching: true,
            cache_dir: None,
            on_disk_cache_removal_delay: Duration::days(7),
            http_timeout: Duration::seconds(30),
            connection_timeout: Duration::seconds(10),
        }
    }
}

impl CrlConfig {
    pub fn default_cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|mut p| {
            p.push("crl-validator");
            p.push("crls");
            p
        })
    }

    pub fn get_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone().or_else(Self::default_cache_dir)
    }

    pub fn from_settings(settings: &dyn Settings) -> Result<Self, ConfigError> {
        let check_mode = match settings.get_string("crl_check_mode").as_deref() {
            Some("0") | Some("DISABLED") | None => CertRevocationCheckMode::Disabled,
            Some("1") | Some("ENABLED") => CertRevocationCheckMode::Enabled,
            Some("2") | Some("ADVISORY") => CertRevocationCheckMode::Advisory,
            Some(other) => {
                tracing::warn!("Unknown crl_check_mode: {other}, using DISABLED");
                CertRevocationCheckMode::Disabled
            }
        };
        let allow_certificates_without_crl_url = settings
            .get_string("crl_allow_certificates_without_crl_url")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);
        let cache_validity_time = settings
            .get_int("crl_validity_time")
            .map(Duration::days)
            .unwrap_or(Duration::days(1));
        let enable_memory_caching = settings
            .get_string("crl_enable_memory_caching")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(true);
        let enable_disk_caching = settings
            .get_string("crl_enable_disk_caching")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(true);
        let cache_dir = settings.get_string("crl_cache_dir").map(PathBuf::from);
        let on_disk_cache_removal_delay = settings
            .get_int("crl_on_disk_cache_removal_delay")
            .map(Duration::days)
            .unwrap_or(Duration::days(7));
        let http_timeout = settings
            .get_int("crl_http_timeout")
            .map(Duration::seconds)
            .unwrap_or(Duration::seconds(30));
        let connection_timeout = settings
            .get_int("crl_connection_timeout")
            .map(Duration::seconds)
            .unwrap_or(Duration::seconds(10));
        Ok(Self {
            check_mode,
            allow_certificates_without_crl_url,
            cache_validity_time,
            enable_memory_caching,
            enable_disk_caching,
            cache_dir,
            on_disk_cache_removal_delay,
            http_timeout,
            connection_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::Setting;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_conservative() {
        let cfg = CrlConfig::default();
        assert_eq!(cfg.check_mode, CertRevocationCheckMode::Disabled);
        assert!(!cfg.allow_certificates_without_crl_url);
        assert!(cfg.enable_memory_caching);
        assert!(cfg.enable_disk_caching);
        assert_eq!(cfg.cache_validity_time.num_days(), 1);
        assert_eq!(cfg.on_disk_cache_removal_delay.num_days(), 7);
    }

    #[test]
    fn from_settings_parses_modes_and_overrides() {
        let mut settings: HashMap<String, Setting> = HashMap::new();
        settings.set_string("crl_check_mode", "ADVISORY".to_string());
        settings.set_string("crl_enable_disk_caching", "false".to_string());
        settings.set_string(
            "crl_allow_certificates_without_crl_url",
            "true".to_string(),
        );
        settings.set_int("crl_validity_time", 7);
        settings.set_int("crl_http_timeout", 45);

        let cfg = CrlConfig::from_settings(&settings).unwrap();
        assert_eq!(cfg.check_mode, CertRevocationCheckMode::Advisory);
        assert!(!cfg.enable_disk_caching);
        assert!(cfg.enable_memory_caching);
        assert!(cfg.allow_certificates_without_crl_url);
        assert_eq!(cfg.cache_validity_time.num_days(), 7);
        assert_eq!(cfg.http_timeout.num_seconds(), 45);
    }

    #[test]
    fn from_settings_unknown_mode_falls_back_to_disabled() {
        let mut settings: HashMap<String, Setting> = HashMap::new();
        settings.set_string("crl_check_mode", "SOMETIMES".to_string());
        let cfg = CrlConfig::from_settings(&settings).unwrap();
        assert_eq!(cfg.check_mode, CertRevocationCheckMode::Disabled);
    }

    #[test]
    fn numeric_mode_aliases() {
        for (raw, expected) in [
            ("0", CertRevocationCheckMode::Disabled),
            ("1", CertRevocationCheckMode::Enabled),
            ("2", CertRevocationCheckMode::Advisory),
        ] {
            let mut settings: HashMap<String, Setting> = HashMap::new();
            settings.set_string("crl_check_mode", raw.to_string());
            let cfg = CrlConfig::from_settings(&settings).unwrap();
            assert_eq!(cfg.check_mode, expected);
        }
    }
}
