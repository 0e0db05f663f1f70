use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

/// The largest iteration count the NSEC3 wire format can carry
const MAX_WIRE_ITERATIONS: u64 = 0xFFFF;

/// Validator configuration. Built from defaults, then optionally a dotted
/// property map, a TOML file, and `VORDR_*` environment overrides; all
/// paths funnel through `validate()`.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Zone-file-format list of DS/DNSKEY trust anchors
    pub trust_anchor_file: Option<PathBuf>,

    /// Seed the store with the built-in root KSKs when no file is given
    pub use_root_anchors: bool,

    /// NSEC3 iteration ceilings as (key size bits, max iterations),
    /// ascending by key size
    pub nsec3_iteration_limits: Vec<(usize, u16)>,

    /// DS digest algorithm numbers in preference order; unlisted digests
    /// are not used
    pub digest_preference: Vec<u8>,

    /// Ignore DS records using less-preferred digests when better ones exist
    pub harden_algo_downgrade: bool,

    /// Symmetric allowance around signature validity windows
    pub clock_skew: Duration,

    /// Cap on signatures verified per response
    pub max_validate_rrsigs: usize,

    /// LRU size of the key cache
    pub key_cache_size: usize,

    /// How long failed key validations are remembered
    pub bad_key_ttl: Duration,

    /// Wall-clock budget for one validated query
    pub query_timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            trust_anchor_file: None,
            use_root_anchors: true,
            nsec3_iteration_limits: vec![(1024, 150), (2048, 500), (4096, 2500)],
            digest_preference: vec![2, 4, 1],
            harden_algo_downgrade: true,
            clock_skew: Duration::from_secs(0),
            max_validate_rrsigs: 32,
            key_cache_size: 1000,
            bad_key_ttl: Duration::from_secs(60),
            query_timeout: Duration::from_secs(5),
        }
    }
}

/// TOML mirror of the public options
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    trust_anchor_file: Option<PathBuf>,
    use_root_anchors: Option<bool>,
    nsec3_iterations: Option<HashMap<String, u64>>,
    digest_preference: Option<Vec<u8>>,
    harden_algo_downgrade: Option<bool>,
    clock_skew_seconds: Option<u64>,
    max_validate_rrsigs: Option<usize>,
    keycache_max_entries: Option<usize>,
    bad_key_ttl_seconds: Option<u64>,
    query_timeout_seconds: Option<u64>,
}

impl ValidatorConfig {
    /// Build from dotted properties (`nsec3.iterations.2048`, ...), the
    /// option names of the original resolver configuration surface
    pub fn from_properties<'a, I>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = ValidatorConfig::default();
        for (key, value) in properties {
            config.apply_property(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_property(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        if let Some(key_size) = key.strip_prefix("nsec3.iterations.") {
            let key_size: usize = key_size.parse().map_err(|_| invalid())?;
            let iterations: u64 = value.parse().map_err(|_| invalid())?;
            self.set_nsec3_limit(key_size, iterations)?;
            return Ok(());
        }

        match key {
            "trust.anchor.file" => self.trust_anchor_file = Some(PathBuf::from(value)),
            "use.root.anchors" => self.use_root_anchors = parse_bool(value).ok_or_else(invalid)?,
            "digest.preference" => {
                self.digest_preference = value
                    .split(',')
                    .map(|t| t.trim().parse::<u8>())
                    .collect::<Result<_, _>>()
                    .map_err(|_| invalid())?;
            }
            "harden.algo.downgrade" => {
                self.harden_algo_downgrade = parse_bool(value).ok_or_else(invalid)?;
            }
            "clock.skew.seconds" => {
                self.clock_skew = Duration::from_secs(value.parse().map_err(|_| invalid())?);
            }
            "max.validate.rrsigs" => {
                self.max_validate_rrsigs = value.parse().map_err(|_| invalid())?;
            }
            "keycache.max.entries" => {
                self.key_cache_size = value.parse().map_err(|_| invalid())?;
            }
            "bad.key.ttl.seconds" => {
                self.bad_key_ttl = Duration::from_secs(value.parse().map_err(|_| invalid())?);
            }
            "query.timeout.seconds" => {
                self.query_timeout = Duration::from_secs(value.parse().map_err(|_| invalid())?);
            }
            _ => return Err(ConfigError::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    fn set_nsec3_limit(&mut self, key_size: usize, iterations: u64) -> Result<(), ConfigError> {
        if iterations > MAX_WIRE_ITERATIONS {
            return Err(ConfigError::Nsec3IterationsOutOfRange {
                key_size,
                value: iterations,
            });
        }
        match self
            .nsec3_iteration_limits
            .iter_mut()
            .find(|(size, _)| *size == key_size)
        {
            Some(limit) => limit.1 = iterations as u16,
            None => self.nsec3_iteration_limits.push((key_size, iterations as u16)),
        }
        self.nsec3_iteration_limits.sort_by_key(|(size, _)| *size);
        Ok(())
    }

    /// Load a TOML configuration file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents).map_err(|err| ConfigError::InvalidValue {
            key: "toml".to_string(),
            value: err.to_string(),
        })?;

        let mut config = ValidatorConfig::default();
        if raw.trust_anchor_file.is_some() {
            config.trust_anchor_file = raw.trust_anchor_file;
        }
        if let Some(value) = raw.use_root_anchors {
            config.use_root_anchors = value;
        }
        if let Some(iterations) = raw.nsec3_iterations {
            for (key_size, limit) in iterations {
                let key_size: usize =
                    key_size.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "nsec3_iterations".to_string(),
                        value: key_size.clone(),
                    })?;
                config.set_nsec3_limit(key_size, limit)?;
            }
        }
        if let Some(value) = raw.digest_preference {
            config.digest_preference = value;
        }
        if let Some(value) = raw.harden_algo_downgrade {
            config.harden_algo_downgrade = value;
        }
        if let Some(value) = raw.clock_skew_seconds {
            config.clock_skew = Duration::from_secs(value);
        }
        if let Some(value) = raw.max_validate_rrsigs {
            config.max_validate_rrsigs = value;
        }
        if let Some(value) = raw.keycache_max_entries {
            config.key_cache_size = value;
        }
        if let Some(value) = raw.bad_key_ttl_seconds {
            config.bad_key_ttl = Duration::from_secs(value);
        }
        if let Some(value) = raw.query_timeout_seconds {
            config.query_timeout = Duration::from_secs(value);
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply `VORDR_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let mappings: [(&str, &str); 5] = [
            ("VORDR_TRUST_ANCHOR_FILE", "trust.anchor.file"),
            ("VORDR_HARDEN_ALGO_DOWNGRADE", "harden.algo.downgrade"),
            ("VORDR_CLOCK_SKEW_SECONDS", "clock.skew.seconds"),
            ("VORDR_KEYCACHE_MAX_ENTRIES", "keycache.max.entries"),
            ("VORDR_QUERY_TIMEOUT_SECONDS", "query.timeout.seconds"),
        ];
        for (env_key, property) in mappings {
            if let Ok(value) = std::env::var(env_key) {
                info!(env_key, "applying environment override");
                self.apply_property(property, &value)?;
            }
        }
        self.validate()
    }

    /// Enforce cross-field invariants; every loader ends here
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key_size, _) in &self.nsec3_iteration_limits {
            if *key_size == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "nsec3.iterations".to_string(),
                    value: "0".to_string(),
                });
            }
        }
        if self.digest_preference.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "digest.preference".to_string(),
                value: "empty".to_string(),
            });
        }
        if self.max_validate_rrsigs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max.validate.rrsigs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.key_cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "keycache.max.entries".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// The iteration ceiling for a signing key of `bits`: the smallest
    /// configured bucket that fits the key, or the largest bucket for
    /// oversized keys.
    pub fn max_iterations_for_key_bits(&self, bits: usize) -> u16 {
        for (key_size, limit) in &self.nsec3_iteration_limits {
            if bits <= *key_size {
                return *limit;
            }
        }
        self.nsec3_iteration_limits
            .last()
            .map(|(_, limit)| *limit)
            .unwrap_or(0)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}
