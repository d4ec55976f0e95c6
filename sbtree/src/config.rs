//! Tree configuration.
//!
//! Configuration is read from environment variables, each with a default.
//!
//! # Environment Variables
//!
//! - `SBTREE_MAX_KEY_SIZE`: largest serialized key accepted by `put`, in bytes (default: `10240`)
//! - `SBTREE_MAX_EMBEDDED_VALUE_SIZE`: largest variable-length value stored inline, in bytes (default: `40960`)
//! - `SBTREE_MAX_PATH_LENGTH`: deepest root-to-leaf descent before the tree is considered corrupt (default: `64`)
//! - `SBTREE_CURSOR_PREFETCH_SIZE`: entries fetched per cursor batch (default: `256`)
//! - `SBTREE_FILE_EXTENSION`: extension of the tree file (default: `.sbt`)
//! - `SBTREE_NULL_FILE_EXTENSION`: extension of the null-key file (default: `.nbt`)
//! - `SBTREE_NULL_KEY_SUPPORT`: whether a value may be stored under the null key (default: `false`)
//!
//! # Invariants
//!
//! - `max_key_size`, `max_path_length` and `cursor_prefetch_size` are never zero
//! - The two file extensions differ, so the tree and null-key files never collide

/// Configuration of one tree instance.
///
/// The page size is a property of the page cache, not of the tree. Key and
/// inline value limits are additionally capped at runtime so that any single
/// entry fits comfortably into one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Largest serialized key accepted by `put`, in bytes.
    pub max_key_size: usize,
    /// Variable-length values larger than this go to overflow value pages.
    pub max_embedded_value_size: usize,
    /// Deepest descent allowed before reporting corruption.
    pub max_path_length: usize,
    /// Entries fetched per cursor batch.
    pub cursor_prefetch_size: usize,
    /// Extension appended to the tree name for the tree file.
    pub file_extension: String,
    /// Extension appended to the tree name for the null-key file.
    pub null_file_extension: String,
    /// Whether the null key is supported.
    pub null_key_support: bool,
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

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_key_size: Self::DEFAULT_MAX_KEY_SIZE,
            max_embedded_value_size: Self::DEFAULT_MAX_EMBEDDED_VALUE_SIZE,
            max_path_length: Self::DEFAULT_MAX_PATH_LENGTH,
            cursor_prefetch_size: Self::DEFAULT_CURSOR_PREFETCH_SIZE,
            file_extension: Self::DEFAULT_FILE_EXTENSION.to_string(),
            null_file_extension: Self::DEFAULT_NULL_FILE_EXTENSION.to_string(),
            null_key_support: false,
        }
    }
}

impl TreeConfig {
    pub const DEFAULT_MAX_KEY_SIZE: usize = 10_240;
    pub const DEFAULT_MAX_EMBEDDED_VALUE_SIZE: usize = 40_960;
    pub const DEFAULT_MAX_PATH_LENGTH: usize = 64;
    pub const DEFAULT_CURSOR_PREFETCH_SIZE: usize = 256;
    pub const DEFAULT_FILE_EXTENSION: &'static str = ".sbt";
    pub const DEFAULT_NULL_FILE_EXTENSION: &'static str = ".nbt";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed or violates
    /// one of the module invariants.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            max_key_size: load_usize(&lookup, "SBTREE_MAX_KEY_SIZE", Self::DEFAULT_MAX_KEY_SIZE)?,
            max_embedded_value_size: load_usize(
                &lookup,
                "SBTREE_MAX_EMBEDDED_VALUE_SIZE",
                Self::DEFAULT_MAX_EMBEDDED_VALUE_SIZE,
            )?,
            max_path_length: load_usize(
                &lookup,
                "SBTREE_MAX_PATH_LENGTH",
                Self::DEFAULT_MAX_PATH_LENGTH,
            )?,
            cursor_prefetch_size: load_usize(
                &lookup,
                "SBTREE_CURSOR_PREFETCH_SIZE",
                Self::DEFAULT_CURSOR_PREFETCH_SIZE,
            )?,
            file_extension: lookup("SBTREE_FILE_EXTENSION")
                .unwrap_or_else(|| Self::DEFAULT_FILE_EXTENSION.to_string()),
            null_file_extension: lookup("SBTREE_NULL_FILE_EXTENSION")
                .unwrap_or_else(|| Self::DEFAULT_NULL_FILE_EXTENSION.to_string()),
            null_key_support: load_bool(&lookup, "SBTREE_NULL_KEY_SUPPORT", false)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the module invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("SBTREE_MAX_KEY_SIZE", self.max_key_size),
            ("SBTREE_MAX_PATH_LENGTH", self.max_path_length),
            ("SBTREE_CURSOR_PREFETCH_SIZE", self.cursor_prefetch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        if self.file_extension == self.null_file_extension {
            return Err(ConfigError::InvalidValue {
                name: "SBTREE_NULL_FILE_EXTENSION".to_string(),
                message: format!(
                    "'{}' is also the tree file extension",
                    self.null_file_extension
                ),
            });
        }

        Ok(())
    }

    /// Enable or disable the null key.
    #[must_use]
    pub const fn with_null_key_support(mut self, enabled: bool) -> Self {
        self.null_key_support = enabled;
        self
    }
}

fn load_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    match lookup(name) {
        Some(value) => value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a non-negative integer"),
        }),
        None => Ok(default),
    }
}

fn load_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(name).as_deref().map(str::trim) {
        Some("true" | "1" | "yes") => Ok(true),
        Some("false" | "0" | "no") => Ok(false),
        Some(other) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{other}' is not a boolean"),
        }),
        None => Ok(default),
    }
}
