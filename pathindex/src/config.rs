//! Index configuration.
//!
//! Configuration is loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PATHINDEX_FILE`: Path of the index file (default: `./pathindex.db`)
//! - `PATHINDEX_PAGE_SIZE`: Page size in bytes (default: `8192`)
//! - `PATHINDEX_KEY_WIDTH`: Key width in 64-bit words, `0` for variable-length
//!   keys (default: `0`)
//! - `PATHINDEX_MAX_NODE_KEYS`: Cap on keys per node (default: limited only by
//!   the page size)
//!
//! # Invariants
//!
//! - `page_size` is accepted by `storage::validate_page_size`
//! - the tree settings are valid for `page_size`

use std::path::PathBuf;

use crate::btree::{BTreeError, KeyFormat, TreeConfig};
use crate::storage::{DEFAULT_PAGE_SIZE, FilePageStore, PageStore, StoreError, validate_page_size};

/// Index configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Path of the index file.
    pub file: PathBuf,
    /// Page size used when the file is created.
    pub page_size: usize,
    /// Key format of the tree.
    pub key_format: KeyFormat,
    /// Optional cap on keys per node.
    pub max_node_keys: Option<usize>,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl IndexConfig {
    /// Default index file.
    pub const DEFAULT_FILE: &'static str = "./pathindex.db";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not valid, or if the key
    /// settings do not fit the page size.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = lookup("PATHINDEX_FILE")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_FILE), PathBuf::from);
        let page_size = Self::load_page_size(&lookup)?;
        let key_format = Self::load_key_format(&lookup)?;
        let max_node_keys = parse_optional::<usize>(&lookup, "PATHINDEX_MAX_NODE_KEYS")?;

        let config = Self {
            file,
            page_size,
            key_format,
            max_node_keys,
        };
        config
            .tree_config()
            .validate(page_size)
            .map_err(|e| match e {
                BTreeError::Config(e) => e,
                other => ConfigError::InvalidValue {
                    name: "PATHINDEX_KEY_WIDTH".to_string(),
                    message: other.to_string(),
                },
            })?;
        Ok(config)
    }

    /// Tree settings for this configuration.
    #[must_use]
    pub const fn tree_config(&self) -> TreeConfig {
        TreeConfig {
            key_format: self.key_format,
            max_node_keys: self.max_node_keys,
        }
    }

    /// Open the configured index file, creating it if it does not exist.
    ///
    /// An existing file keeps the page size it was created with. Its key
    /// width must match the configured one.
    pub fn open_store(&self) -> Result<FilePageStore, StoreError> {
        if self.file.exists() {
            let store = FilePageStore::open(&self.file)?;
            let stored = store.superblock().index_key_width;
            let configured = self.key_format.key_length_field();
            if stored != configured {
                return Err(StoreError::KeyWidthMismatch { stored, configured });
            }
            if store.page_size() != self.page_size {
                tracing::warn!(
                    "{} uses page size {}, ignoring configured {}",
                    self.file.display(),
                    store.page_size(),
                    self.page_size
                );
            }
            Ok(store)
        } else {
            let mut store = FilePageStore::create(&self.file, self.page_size)?;
            store.superblock_mut().index_key_width = self.key_format.key_length_field();
            store.sync()?;
            Ok(store)
        }
    }

    fn load_page_size<F>(lookup: &F) -> Result<usize, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let page_size =
            parse_optional::<usize>(lookup, "PATHINDEX_PAGE_SIZE")?.unwrap_or(DEFAULT_PAGE_SIZE);
        validate_page_size(page_size).map_err(|e| ConfigError::InvalidValue {
            name: "PATHINDEX_PAGE_SIZE".to_string(),
            message: e.to_string(),
        })?;
        Ok(page_size)
    }

    fn load_key_format<F>(lookup: &F) -> Result<KeyFormat, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let width = parse_optional::<u32>(lookup, "PATHINDEX_KEY_WIDTH")?.unwrap_or(0);
        Ok(KeyFormat::from_key_length_field(width))
    }
}

fn parse_optional<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
{
    lookup(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{value}' is not a valid number"),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::tempdir;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = IndexConfig::from_lookup(|_| None).expect("defaults");
        assert_eq!(config.file, PathBuf::from("./pathindex.db"));
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.key_format, KeyFormat::Variable);
        assert_eq!(config.max_node_keys, None);
    }

    #[test]
    fn test_values_from_lookup() {
        let config = IndexConfig::from_lookup(lookup_from(&[
            ("PATHINDEX_FILE", "/tmp/paths.idx"),
            ("PATHINDEX_PAGE_SIZE", "4096"),
            ("PATHINDEX_KEY_WIDTH", "3"),
            ("PATHINDEX_MAX_NODE_KEYS", "64"),
        ]))
        .expect("config");
        assert_eq!(config.file, PathBuf::from("/tmp/paths.idx"));
        assert_eq!(config.page_size, 4096);
        assert_eq!(
            config.tree_config(),
            TreeConfig::new(KeyFormat::Fixed(3)).with_max_node_keys(64)
        );
    }

    #[test]
    fn test_invalid_values() {
        let error = IndexConfig::from_lookup(lookup_from(&[("PATHINDEX_PAGE_SIZE", "big")]))
            .expect_err("not a number");
        assert_eq!(
            error,
            ConfigError::InvalidValue {
                name: "PATHINDEX_PAGE_SIZE".to_string(),
                message: "'big' is not a valid number".to_string(),
            }
        );

        assert!(IndexConfig::from_lookup(lookup_from(&[("PATHINDEX_PAGE_SIZE", "100")])).is_err());
        assert!(
            IndexConfig::from_lookup(lookup_from(&[("PATHINDEX_MAX_NODE_KEYS", "1")])).is_err()
        );
        assert!(
            IndexConfig::from_lookup(lookup_from(&[
                ("PATHINDEX_PAGE_SIZE", "256"),
                ("PATHINDEX_KEY_WIDTH", "40"),
            ]))
            .is_err()
        );
    }

    #[test]
    fn test_open_store_creates_then_reopens() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("paths.idx");
        let config = IndexConfig {
            file: path.clone(),
            page_size: 1024,
            key_format: KeyFormat::Fixed(2),
            max_node_keys: None,
        };

        let store = config.open_store().expect("create");
        assert_eq!(store.superblock().index_key_width, 2);
        drop(store);

        let reopened = IndexConfig {
            page_size: 4096,
            ..config
        };
        let store = reopened.open_store().expect("open");
        assert_eq!(store.page_size(), 1024);
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_open_store_rejects_other_key_width() {
        let dir = tempdir().expect("create temp dir");
        let config = IndexConfig {
            file: dir.path().join("paths.idx"),
            page_size: 1024,
            key_format: KeyFormat::Fixed(2),
            max_node_keys: None,
        };
        drop(config.open_store().expect("create"));

        let variable = IndexConfig {
            key_format: KeyFormat::Variable,
            ..config.clone()
        };
        let error = variable.open_store().err().expect("width differs");
        assert!(matches!(
            error,
            StoreError::KeyWidthMismatch {
                stored: 2,
                configured: 0
            }
        ));

        let wider = IndexConfig {
            key_format: KeyFormat::Fixed(3),
            ..config.clone()
        };
        assert!(wider.open_store().is_err());
        config.open_store().expect("same width reopens");
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
