//! Runtime configuration.
//!
//! One [`Config`] is built at startup (defaults, then an optional JSON file,
//! then `IMGWARD_*` environment overrides), validated once, and each component
//! receives its own section. Nothing reads configuration lazily.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::policy::EnforcementPolicy;

/// Fingerprint extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtractorConfig {
    /// Frames decoded from animated input (default: 6)
    pub max_frames: usize,
    /// Hash augmented variants of each frame (default: true)
    pub augment: bool,
    /// Augmented variants per frame (default: 4)
    pub augment_per_frame: usize,
    /// Small-angle rotation applied both ways, in degrees (default: 7)
    pub rotation_degrees: f32,
    /// Share of the area kept by the center crop (default: 0.95)
    pub crop_area_fraction: f32,
    /// Compute tile signatures (default: true)
    pub tiles: bool,
    /// Tile grid edge (default: 3, i.e. 3×3 cells)
    pub tile_grid: u32,
    /// Hash edge; fingerprints carry `hash_size²` bits (default: 8)
    pub hash_size: u32,
    /// Hash only this many leading bytes for the content hash (default: all)
    pub content_hash_prefix_bytes: Option<usize>,
    /// Images whose shorter side is below this are not fingerprinted (default: 0)
    pub min_edge: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_frames: 6,
            augment: true,
            augment_per_frame: 4,
            rotation_degrees: 7.0,
            crop_area_fraction: 0.95,
            tiles: true,
            tile_grid: 3,
            hash_size: 8,
            content_hash_prefix_bytes: None,
            min_edge: 0,
        }
    }
}

/// Exemption gate settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GateConfig {
    /// Channel ids never scanned
    pub exempt_channels: Vec<String>,
    /// Thread ids never scanned
    pub exempt_threads: Vec<String>,
    /// Exempt every thread scope
    pub exempt_all_threads: bool,
}

/// Snapshot locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Known-record snapshot; `.cbor` selects CBOR, anything else JSON
    pub path: PathBuf,
    /// Whitelist snapshot
    pub whitelist_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/imgward/store.json"),
            whitelist_path: PathBuf::from("data/imgward/whitelist.json"),
        }
    }
}

/// Reconciliation job settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcileConfig {
    /// Upper bound on observed fingerprints per cycle (default: 1000)
    pub observed_limit: usize,
    /// Seconds between periodic cycles (default: 86400)
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            observed_limit: 1000,
            interval_secs: 86_400,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Decision pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Per-attachment extraction deadline in milliseconds (default: 10000)
    pub extract_timeout_ms: u64,
    /// Report actions without applying them (default: true)
    pub dry_run: bool,
    /// Timeout length attached to `timeout` actions (default: 20)
    pub timeout_minutes: u64,
    /// Attachment name extensions worth scanning; empty scans everything
    pub allowed_extensions: Vec<String>,
    /// Enforcement log capacity (default: 1000)
    pub enforcement_log_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extract_timeout_ms: 10_000,
            dry_run: true,
            timeout_minutes: 20,
            allowed_extensions: ["png", "jpg", "jpeg", "webp", "gif", "bmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            enforcement_log_capacity: 1000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub extractor: ExtractorConfig,
    pub policy: EnforcementPolicy,
    pub gate: GateConfig,
    pub store: StoreConfig,
    pub reconcile: ReconcileConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load defaults, overlay the JSON file if given, then the environment,
    /// and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration file. Missing sections and fields keep
    /// their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            WardenError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            WardenError::InvalidConfig(format!("cannot parse {}: {e}", path.display()))
        })
    }

    /// Overlay `IMGWARD_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(
            var: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            var(key).and_then(|v| v.trim().parse().ok())
        }

        if let Some(path) = var("IMGWARD_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(path) = var("IMGWARD_WHITELIST_PATH") {
            self.store.whitelist_path = PathBuf::from(path);
        }
        if let Some(v) = parsed(&var, "IMGWARD_STRONG_DISTANCE") {
            self.policy.strong_distance = v;
        }
        if let Some(v) = parsed(&var, "IMGWARD_MODERATE_DISTANCE") {
            self.policy.moderate_distance = v;
        }
        if let Some(v) = parsed(&var, "IMGWARD_MIN_LABELED_DUPLICATES") {
            self.policy.min_labeled_duplicates = v;
        }
        if let Some(v) = parsed(&var, "IMGWARD_MAX_FRAMES") {
            self.extractor.max_frames = v;
        }
        if let Some(v) = parsed(&var, "IMGWARD_MIN_EDGE") {
            self.extractor.min_edge = v;
        }
        if let Some(v) = parsed(&var, "IMGWARD_EXTRACT_TIMEOUT_MS") {
            self.pipeline.extract_timeout_ms = v;
        }
        if let Some(v) = parsed(&var, "IMGWARD_RECONCILE_INTERVAL_SECS") {
            self.reconcile.interval_secs = v;
        }
        // Anything but an explicit "false" keeps preview mode on.
        if let Some(v) = var("IMGWARD_DRY_RUN") {
            self.pipeline.dry_run = v.to_lowercase() != "false";
        }
        if let Some(v) = var("IMGWARD_EXEMPT_ALL_THREADS") {
            self.gate.exempt_all_threads = v.to_lowercase() == "true";
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;

        let e = &self.extractor;
        if e.max_frames == 0 {
            return Err(invalid("extractor.maxFrames must be at least 1"));
        }
        if e.tiles && e.tile_grid == 0 {
            return Err(invalid("extractor.tileGrid must be at least 1"));
        }
        if !(2..=32).contains(&e.hash_size) {
            return Err(invalid("extractor.hashSize must be between 2 and 32"));
        }
        if !(e.crop_area_fraction > 0.0 && e.crop_area_fraction <= 1.0) {
            return Err(invalid("extractor.cropAreaFraction must be in (0, 1]"));
        }
        if !(0.0..45.0).contains(&e.rotation_degrees) {
            return Err(invalid("extractor.rotationDegrees must be in [0, 45)"));
        }
        if e.content_hash_prefix_bytes == Some(0) {
            return Err(invalid("extractor.contentHashPrefixBytes must be positive"));
        }
        if self.pipeline.extract_timeout_ms == 0 {
            return Err(invalid("pipeline.extractTimeoutMs must be positive"));
        }
        if self.pipeline.enforcement_log_capacity == 0 {
            return Err(invalid("pipeline.enforcementLogCapacity must be positive"));
        }
        if self.reconcile.observed_limit == 0 {
            return Err(invalid("reconcile.observedLimit must be positive"));
        }
        if self.reconcile.interval_secs == 0 {
            return Err(invalid("reconcile.intervalSecs must be positive"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> WardenError {
    WardenError::InvalidConfig(msg.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::policy::Action;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.extractor.max_frames, 6);
        assert_eq!(config.extractor.tile_grid, 3);
        assert_eq!(config.policy.strong_distance, 4);
        assert_eq!(config.policy.moderate_distance, 8);
        assert!(config.pipeline.dry_run);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "policy": { "strongDistance": 2, "actionForTier": { "strong": "kick", "moderate": "none" } },
            "extractor": { "augment": false }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.policy.strong_distance, 2);
        assert_eq!(config.policy.moderate_distance, 8);
        assert_eq!(config.policy.action_for_tier.strong, Action::Kick);
        assert!(!config.extractor.augment);
        assert_eq!(config.extractor.max_frames, 6);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("IMGWARD_STORE_PATH", "/tmp/store.cbor"),
            ("IMGWARD_MODERATE_DISTANCE", "12"),
            ("IMGWARD_DRY_RUN", "false"),
            ("IMGWARD_MAX_FRAMES", "not-a-number"),
            ("IMGWARD_RECONCILE_INTERVAL_SECS", "3600"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.store.path, PathBuf::from("/tmp/store.cbor"));
        assert_eq!(config.policy.moderate_distance, 12);
        assert!(!config.pipeline.dry_run);
        assert_eq!(config.reconcile.interval(), Duration::from_secs(3600));
        // Unparseable values are ignored.
        assert_eq!(config.extractor.max_frames, 6);
    }

    #[test]
    fn test_validate_rejects_inverted_distances() {
        let mut config = Config::default();
        config.policy.strong_distance = 10;
        config.policy.moderate_distance = 5;
        assert!(matches!(
            config.validate(),
            Err(WardenError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_frames() {
        let mut config = Config::default();
        config.extractor.max_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/imgward.json")).unwrap_err();
        assert!(matches!(err, WardenError::InvalidConfig(_)));
    }
}
