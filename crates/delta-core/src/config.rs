//! Repository configuration.

/// Prefix of the environment variables read by [`RepositoryConfig::from_env`].
pub const ENV_PREFIX: &str = "DELTA__";

/// Default size of a save section and of the copy buffer.
pub const DEFAULT_PROCESSING_LIMIT: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Tunables of a [`crate::repository::SegmentsRepository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Largest section the save algorithm moves at once. Also the chunk size
    /// used for every bulk copy between sources.
    pub processing_limit: usize,
    /// Whether a save ends with `fsync`.
    pub sync_on_save: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            processing_limit: DEFAULT_PROCESSING_LIMIT,
            sync_on_save: true,
        }
    }
}

impl RepositoryConfig {
    /// Defaults with `DELTA__*` environment overrides applied.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidValue`] if a variable does not parse or the
    ///   processing limit is zero.
    /// - [`ConfigError::UnknownKey`] for any other `DELTA__*` variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.apply_overrides(std::env::vars())?;

        Ok(config)
    }

    /// Applies `DELTA__PROCESSING_LIMIT` / `DELTA__SYNC_ON_SAVE` style pairs.
    /// Keys without the prefix are ignored.
    ///
    /// # Errors
    ///
    /// Same as [`RepositoryConfig::from_env`].
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let key = key.as_ref();
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();

            match name.to_ascii_lowercase().as_str() {
                "processing_limit" => {
                    let limit: usize = parse_value(key, value)?;

                    check_processing_limit(key, limit)?;
                    self.processing_limit = limit;
                }
                "sync_on_save" => self.sync_on_save = parse_value(key, value)?,
                _ => return Err(ConfigError::UnknownKey(key.to_string())),
            }
        }

        Ok(())
    }

    /// Rejects settings the save algorithm cannot run with.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidValue`] if the processing limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_processing_limit("processing_limit", self.processing_limit)
    }

    /// # Panics
    ///
    /// Panics if `limit` is zero.
    #[must_use]
    pub fn with_processing_limit(mut self, limit: usize) -> Self {
        assert!(limit > 0, "processing limit must be positive");

        self.processing_limit = limit;
        self
    }

    #[must_use]
    pub fn with_sync_on_save(mut self, sync: bool) -> Self {
        self.sync_on_save = sync;
        self
    }
}

fn check_processing_limit(key: &str, limit: usize) -> Result<(), ConfigError> {
    if limit == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: limit.to_string(),
        });
    }

    Ok(())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod config_tests {
    use crate::config::{ConfigError, DEFAULT_PROCESSING_LIMIT, RepositoryConfig};

    #[test]
    fn defaults() {
        let config = RepositoryConfig::default();

        assert_eq!(config.processing_limit, DEFAULT_PROCESSING_LIMIT);
        assert!(config.sync_on_save);
    }

    #[test]
    fn overrides_are_applied() {
        let mut config = RepositoryConfig::default();

        config
            .apply_overrides([
                ("DELTA__PROCESSING_LIMIT", "16"),
                ("DELTA__sync_on_save", " false "),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();

        assert_eq!(config.processing_limit, 16);
        assert!(!config.sync_on_save);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = RepositoryConfig::default();

        assert!(matches!(
            config.apply_overrides([("DELTA__PROCESSING_LIMIT", "0")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.apply_overrides([("DELTA__SYNC_ON_SAVE", "maybe")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config.apply_overrides([("DELTA__PAGE_SIZE", "10")]),
            Err(ConfigError::UnknownKey(_))
        ));
        assert_eq!(config, RepositoryConfig::default());
    }

    #[test]
    fn builder_setters() {
        let config = RepositoryConfig::default()
            .with_processing_limit(7)
            .with_sync_on_save(false);

        assert_eq!(config.processing_limit, 7);
        assert!(!config.sync_on_save);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limit_fails_validation() {
        let config = RepositoryConfig {
            processing_limit: 0,
            ..RepositoryConfig::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
    }
}
