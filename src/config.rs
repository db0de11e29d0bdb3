// src/config.rs
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

use crate::enrich::{EnrichmentSettings, ScanColumns};
use crate::error::{LookupError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Where the large dataset comes from and where it is kept.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_blob_id")]
    pub dataset_id: String,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// `{id}` is replaced with `dataset_id`.
    #[serde(default = "default_download_url_template")]
    pub download_url_template: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    #[serde(default = "default_small_path")]
    pub small_path: Option<PathBuf>,
    #[serde(default = "default_key_column")]
    pub key_column: String,
    #[serde(default = "default_local_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    /// Catalog package holding the authoritative company register.
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default = "default_key_column")]
    pub key_column: String,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    #[serde(default = "default_legal_form_column")]
    pub legal_form_column: String,
    #[serde(default = "default_scan_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_blob_id() -> String {
    "1xfyW-Y8JhpGG2lTP6YcdC6kHuk7DBz3A".to_string()
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("data/cache/web_uu_an2024_convertit.csv")
}
fn default_download_url_template() -> String {
    "https://drive.google.com/uc?export=download&id={id}".to_string()
}
fn default_small_path() -> Option<PathBuf> {
    Some(PathBuf::from("data/web_bl_bs_sl_an2024_convertit.csv"))
}
fn default_key_column() -> String {
    "CUI".to_string()
}
fn default_local_batch_size() -> usize {
    64 * 1024
}
fn default_true() -> bool {
    true
}
fn default_catalog_url() -> String {
    "https://data.gov.ro/".to_string()
}
fn default_delimiter() -> String {
    ";".to_string()
}
fn default_name_column() -> String {
    "DENUMIRE".to_string()
}
fn default_legal_form_column() -> String {
    "FORMA_JURIDICA".to_string()
}
fn default_scan_batch_size() -> usize {
    100_000
}
fn default_concurrency() -> usize {
    4
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dataset_id: default_blob_id(),
            path: default_cache_path(),
            download_url_template: default_download_url_template(),
            timeout_secs: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            small_path: default_small_path(),
            key_column: default_key_column(),
            batch_size: default_local_batch_size(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            catalog_url: default_catalog_url(),
            dataset_id: None,
            resource_id: None,
            delimiter: default_delimiter(),
            key_column: default_key_column(),
            name_column: default_name_column(),
            legal_form_column: default_legal_form_column(),
            batch_size: default_scan_batch_size(),
            concurrency: default_concurrency(),
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Load from a YAML file. No path, or a path that does not exist, gives
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) if p.exists() => {
                let text = fs::read_to_string(p)?;
                let config: Config = serde_yaml::from_str(&text).map_err(|e| {
                    LookupError::Config(format!("invalid config {}: {}", p.display(), e))
                })?;
                info!(path = %p.display(), "loaded config");
                config
            }
            Some(p) => {
                info!(path = %p.display(), "config file not found, using defaults");
                Config::default()
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local.key_column.trim().is_empty() {
            return Err(LookupError::Config("local.key_column is empty".into()));
        }
        if self.local.batch_size == 0 {
            return Err(LookupError::Config("local.batch_size must be > 0".into()));
        }
        if !self.cache.download_url_template.contains("{id}") {
            return Err(LookupError::Config(
                "cache.download_url_template must contain {id}".into(),
            ));
        }
        self.enrichment.delimiter_byte()?;
        if self.enrichment.batch_size == 0 {
            return Err(LookupError::Config(
                "enrichment.batch_size must be > 0".into(),
            ));
        }
        if self.enrichment.concurrency == 0 {
            return Err(LookupError::Config(
                "enrichment.concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl EnrichmentConfig {
    /// The delimiter must be exactly one ASCII character.
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [b] if b.is_ascii() => Ok(*b),
            _ => Err(LookupError::Config(format!(
                "enrichment.delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            ))),
        }
    }

    /// `None` when enrichment is switched off or no catalog entry is set.
    pub fn settings(&self) -> Result<Option<EnrichmentSettings>> {
        let dataset_id = match (&self.dataset_id, self.enabled) {
            (Some(id), true) if !id.trim().is_empty() => id.clone(),
            _ => return Ok(None),
        };
        Ok(Some(EnrichmentSettings {
            dataset_id,
            columns: ScanColumns {
                key: self.key_column.clone(),
                name: self.name_column.clone(),
                legal_form: self.legal_form_column.clone(),
            },
            delimiter: self.delimiter_byte()?,
            batch_size: self.batch_size,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_file_falls_back_to_defaults() -> Result<()> {
        let config = Config::load(Some(Path::new("/definitely/not/here.yaml")))?;
        assert_eq!(config.local.key_column, "CUI");
        assert_eq!(config.enrichment.delimiter_byte()?, b';');
        assert_eq!(config.enrichment.batch_size, 100_000);
        assert!(config.enrichment.settings()?.is_none());
        Ok(())
    }

    #[test]
    fn yaml_overrides_are_applied() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
cache:
  dataset_id: abc
  path: /tmp/big.csv
  timeout_secs: 30
local:
  small_path: null
enrichment:
  dataset_id: firme-onrc
  delimiter: ","
  batch_size: 500
  concurrency: 2
"#
        )?;
        let config = Config::load(Some(file.path()))?;
        assert_eq!(config.cache.dataset_id, "abc");
        assert_eq!(config.cache.timeout(), Some(Duration::from_secs(30)));
        assert!(config.local.small_path.is_none());

        let settings = config.enrichment.settings()?.expect("enrichment configured");
        assert_eq!(settings.dataset_id, "firme-onrc");
        assert_eq!(settings.delimiter, b',');
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.columns.name, "DENUMIRE");
        Ok(())
    }

    #[test]
    fn rejects_multi_character_delimiter() {
        let mut config = Config::default();
        config.enrichment.delimiter = ";;".into();
        assert!(matches!(config.validate(), Err(LookupError::Config(_))));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = Config::default();
        config.enrichment.concurrency = 0;
        assert!(matches!(config.validate(), Err(LookupError::Config(_))));
    }

    #[test]
    fn example_config_parses() -> Result<()> {
        let config: Config = serde_yaml::from_str(include_str!("../config/cuilookup.example.yaml"))
            .map_err(|e| LookupError::Config(e.to_string()))?;
        config.validate()?;
        assert_eq!(config.cache.timeout(), Some(Duration::from_secs(600)));
        assert!(config.enrichment.settings()?.is_none());
        Ok(())
    }

    #[test]
    fn disabled_enrichment_has_no_settings() -> Result<()> {
        let mut config = Config::default();
        config.enrichment.dataset_id = Some("firme".into());
        config.enrichment.enabled = false;
        assert!(config.enrichment.settings()?.is_none());
        Ok(())
    }
}
