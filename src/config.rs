//! Configuration for load, cache, save and thread-pool defaults.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. stock defaults,
//! 2. an optional `imgport.toml` (or whatever `--config` names),
//! 3. environment variables.
//!
//! ## Config File
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [load]
//! disc_threshold = "100m"   # decode images bigger than this to a temp file
//! disc = true               # allow the temp-file store at all
//! access = "random"         # random | sequential | sequential-unbuffered
//! fail_on = "none"          # none | truncated | error | warning
//! memory = false            # always decode to memory
//!
//! [cache]
//! enabled = true
//! max_entries = 100
//!
//! [save]
//! keep = "all"              # none | all | exif|xmp|iptc|icc|other
//! background = [0.0]        # flatten colour for savers without alpha
//!
//! [processing]
//! max_threads = 4           # omit for one thread per core
//! ```
//!
//! Config files are sparse; unknown keys are rejected to catch typos early.
//!
//! ## Environment
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `IMGPORT_DISC_THRESHOLD` | `load.disc_threshold`, with `k`/`m`/`g` suffixes |
//! | `IMGPORT_CONCURRENCY` | `processing.max_threads` |

use crate::handler::{Access, FailOn};
use crate::metadata::Keep;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "imgport.toml";

pub const ENV_DISC_THRESHOLD: &str = "IMGPORT_DISC_THRESHOLD";
pub const ENV_CONCURRENCY: &str = "IMGPORT_CONCURRENCY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImgportConfig {
    pub load: LoadConfig,
    pub cache: CacheConfig,
    pub save: SaveConfig,
    pub processing: ProcessingConfig,
}

impl ImgportConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_threads must be at least 1".into(),
            ));
        }
        if self.save.background.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::Validation(
                "save.background values must be finite numbers".into(),
            ));
        }
        Ok(())
    }
}

/// Defaults for every load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    /// Decoded images larger than this go to a temporary file.
    pub disc_threshold: ByteSize,
    /// Allow the temporary-file store.
    pub disc: bool,
    pub access: Access,
    pub fail_on: FailOn,
    /// Always decode to memory.
    pub memory: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            disc_threshold: ByteSize(100 * 1024 * 1024),
            disc: true,
            access: Access::Random,
            fail_on: FailOn::None,
            memory: false,
        }
    }
}

/// Load-operation cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100,
        }
    }
}

/// Defaults for every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveConfig {
    pub keep: Keep,
    /// Background for flattening alpha: one value per band, or one for all.
    pub background: Vec<f64>,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            keep: Keep::ALL,
            background: vec![0.0],
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of worker threads for strip fetching.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.min(cores)).unwrap_or(cores)
}

/// A byte count written as a plain integer or with a `k`, `m` or `g`
/// suffix (powers of 1024): `"512k"`, `"100m"`, `"1g"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SizeRepr", into = "String")]
pub struct ByteSize(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Int(u64),
    Text(String),
}

impl ByteSize {
    pub fn bytes(self) -> u64 {
        self.0
    }
}

const UNITS: [(char, u64); 3] = [('g', 1 << 30), ('m', 1 << 20), ('k', 1 << 10)];

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_lowercase();
        let text = text.strip_suffix('b').unwrap_or(&text);
        let (digits, scale) = match text.chars().last() {
            Some(c) => match UNITS.iter().find(|(u, _)| *u == c) {
                Some((_, scale)) => (&text[..text.len() - 1], *scale),
                None => (text, 1),
            },
            None => return Err("empty size".to_string()),
        };
        let n: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("\"{s}\" is not a size"))?;
        n.checked_mul(scale)
            .map(ByteSize)
            .ok_or_else(|| format!("\"{s}\" is too large"))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (unit, scale) in UNITS {
            if self.0 >= scale && self.0 % scale == 0 {
                return write!(f, "{}{unit}", self.0 / scale);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl TryFrom<SizeRepr> for ByteSize {
    type Error = String;

    fn try_from(repr: SizeRepr) -> Result<Self, Self::Error> {
        match repr {
            SizeRepr::Int(n) => Ok(ByteSize(n)),
            SizeRepr::Text(s) => s.parse(),
        }
    }
}

impl From<ByteSize> for String {
    fn from(size: ByteSize) -> String {
        size.to_string()
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ImgportConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ImgportConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ImgportConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Override `config` from environment variables read through `lookup`.
pub fn apply_env(
    config: &mut ImgportConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(ENV_DISC_THRESHOLD) {
        config.load.disc_threshold = value
            .parse()
            .map_err(|e| ConfigError::Validation(format!("{ENV_DISC_THRESHOLD}: {e}")))?;
    }
    if let Some(value) = lookup(ENV_CONCURRENCY) {
        let n: usize = value.trim().parse().map_err(|_| {
            ConfigError::Validation(format!("{ENV_CONCURRENCY}: \"{value}\" is not a number"))
        })?;
        config.processing.max_threads = Some(n);
    }
    config.validate()
}

/// Load config from `path` (stock defaults when it doesn't exist), then
/// apply the process environment.
pub fn load_config(path: &Path) -> Result<ImgportConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    let mut config = resolve_config(base, overlay)?;
    apply_env(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Returns a fully-commented stock `imgport.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgport configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Loading
# ---------------------------------------------------------------------------
[load]
# Decoded images larger than this are kept in a temporary file instead of
# memory. Plain bytes or k / m / g suffixes. IMGPORT_DISC_THRESHOLD overrides.
disc_threshold = "100m"

# Set to false to never use temporary files.
disc = true

# How pixels will be read: random, sequential or sequential-unbuffered.
access = "random"

# Error level at which loaders give up: none, truncated, error or warning.
fail_on = "none"

# Always decode to memory, whatever the size.
memory = false

# ---------------------------------------------------------------------------
# Load cache
# ---------------------------------------------------------------------------
[cache]
# Share header reads and decodes between loads of the same input.
enabled = true

# Oldest entries are dropped past this many.
max_entries = 100

# ---------------------------------------------------------------------------
# Saving
# ---------------------------------------------------------------------------
[save]
# Metadata to keep: none, all, or any of exif, xmp, iptc, icc, other
# joined with "|".
keep = "all"

# Colour to flatten alpha onto for formats without alpha. One value per
# band, or a single value for all bands.
background = [0.0]

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum worker threads for fetching pixels in parallel.
# Omit or comment out to auto-detect (= number of CPU cores).
# IMGPORT_CONCURRENCY overrides.
# max_threads = 4
"##
}
