//! Streaming configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use texstream_core::PixelFormat;

use crate::error::StreamingError;

const MIB: usize = 1024 * 1024;

/// A staging buffer the pool keeps ready for the worker at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetEntry {
    /// Format family of the buffer.
    pub format: PixelFormat,
    /// Width and height of the buffer.
    pub min_resolution: u32,
    /// Array slices of the buffer.
    pub min_slices: u32,
}

impl BudgetEntry {
    pub fn new(format: PixelFormat, min_resolution: u32, min_slices: u32) -> Self {
        Self {
            format: format.family(),
            min_resolution,
            min_slices,
        }
    }

    /// Bytes a buffer satisfying this entry occupies.
    pub fn size_bytes(&self, row_alignment: u32) -> usize {
        self.format.size_bytes(
            self.min_resolution,
            self.min_resolution,
            1,
            self.min_slices,
            row_alignment,
        )
    }
}

/// Tuning knobs of a [`TextureStreamingManager`](crate::TextureStreamingManager).
///
/// Every field has a default; TOML files only need to name what they change:
///
/// ```toml
/// max_preload_bytes = 67108864
/// entries_per_iteration = 8
///
/// [[minimum_budget]]
/// format = "Rgba8Unorm"
/// min_resolution = 2048
/// min_slices = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Bytes the worker may copy into staging buffers per pass before it
    /// stops draining queued transfers.
    pub max_preload_bytes: usize,
    /// Ceiling on the bytes held by idle staging buffers in the pool.
    pub staging_max_budget_bytes: usize,
    /// Largest staging buffer created for a single usage-stat request, and
    /// largest tile a work item is split into.
    pub max_bytes_per_staging_request: usize,
    /// Staging buffers kept mapped for the worker every update.
    pub minimum_budget: Vec<BudgetEntry>,
    /// Work items wider or taller than this are split into tiles.
    pub max_split_resolution: u32,
    /// New load requests the worker starts per pass.
    pub entries_per_iteration: usize,
    /// Consecutive failed `try_lock`s before `update` blocks on the worker.
    pub try_lock_failure_limit: u32,
    /// Minimum fill percentage when reusing a staging buffer (0 disables).
    pub staging_min_fill_ratio: u32,
    /// Where the metadata cache is loaded from and saved to.
    pub metadata_cache_path: Option<PathBuf>,
    /// Extra threads decoding in parallel with the worker (0 = worker decodes).
    pub decode_threads: usize,
    /// Process requests strictly in arrival order on a single decode path.
    pub no_reorder: bool,
    /// Slices of each automatic-batching texture pool.
    pub texture_pool_slices: u32,
    /// Timeout of the waits in the blocking helpers, in milliseconds.
    pub wait_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_preload_bytes: 256 * MIB,
            staging_max_budget_bytes: 512 * MIB,
            max_bytes_per_staging_request: 64 * MIB,
            minimum_budget: vec![
                BudgetEntry::new(PixelFormat::Rgba8Unorm, 4096, 2),
                BudgetEntry::new(PixelFormat::Bc1RgbaUnorm, 4096, 2),
                BudgetEntry::new(PixelFormat::Bc3RgbaUnorm, 4096, 1),
                BudgetEntry::new(PixelFormat::Bc5RgUnorm, 4096, 1),
            ],
            max_split_resolution: 4096,
            entries_per_iteration: 3,
            try_lock_failure_limit: 1200,
            staging_min_fill_ratio: 50,
            metadata_cache_path: None,
            decode_threads: 0,
            no_reorder: false,
            texture_pool_slices: 16,
            wait_timeout_ms: 2,
        }
    }
}

impl StreamingConfig {
    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, StreamingError> {
        toml::from_str(content).map_err(|e| StreamingError::InvalidConfig(e.to_string()))
    }

    /// Load a TOML file, then apply `TEXSTREAM_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, StreamingError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content).map_err(|e| {
            StreamingError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        log::info!("Loaded streaming config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), StreamingError> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_env_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), StreamingError> {
        if let Some(v) = lookup("TEXSTREAM_MAX_PRELOAD_BYTES") {
            self.max_preload_bytes = parse_number("TEXSTREAM_MAX_PRELOAD_BYTES", &v)?;
        }
        if let Some(v) = lookup("TEXSTREAM_STAGING_MAX_BUDGET_BYTES") {
            self.staging_max_budget_bytes = parse_number("TEXSTREAM_STAGING_MAX_BUDGET_BYTES", &v)?;
        }
        if let Some(v) = lookup("TEXSTREAM_MAX_SPLIT_RESOLUTION") {
            self.max_split_resolution = parse_number("TEXSTREAM_MAX_SPLIT_RESOLUTION", &v)?;
        }
        if let Some(v) = lookup("TEXSTREAM_ENTRIES_PER_ITERATION") {
            self.entries_per_iteration = parse_number("TEXSTREAM_ENTRIES_PER_ITERATION", &v)?;
        }
        if let Some(v) = lookup("TEXSTREAM_TRY_LOCK_FAILURE_LIMIT") {
            self.try_lock_failure_limit = parse_number("TEXSTREAM_TRY_LOCK_FAILURE_LIMIT", &v)?;
        }
        if let Some(v) = lookup("TEXSTREAM_DECODE_THREADS") {
            self.decode_threads = parse_number("TEXSTREAM_DECODE_THREADS", &v)?;
        }
        if let Some(v) = lookup("TEXSTREAM_NO_REORDER") {
            self.no_reorder = parse_bool("TEXSTREAM_NO_REORDER", &v)?;
        }
        if let Some(v) = lookup("TEXSTREAM_METADATA_CACHE") {
            self.metadata_cache_path = if v.is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        Ok(())
    }

    /// Reject values the streamer cannot work with.
    pub fn validate(&self) -> Result<(), StreamingError> {
        if self.max_split_resolution == 0 {
            return Err(StreamingError::InvalidConfig(
                "max_split_resolution must be at least 1".into(),
            ));
        }
        if self.entries_per_iteration == 0 {
            return Err(StreamingError::InvalidConfig(
                "entries_per_iteration must be at least 1".into(),
            ));
        }
        if self.staging_min_fill_ratio > 100 {
            return Err(StreamingError::InvalidConfig(format!(
                "staging_min_fill_ratio is a percentage, got {}",
                self.staging_min_fill_ratio
            )));
        }
        if self.max_bytes_per_staging_request == 0 {
            return Err(StreamingError::InvalidConfig(
                "max_bytes_per_staging_request must be non-zero".into(),
            ));
        }
        if self.texture_pool_slices == 0 {
            return Err(StreamingError::InvalidConfig(
                "texture_pool_slices must be at least 1".into(),
            ));
        }
        if let Some(entry) = self
            .minimum_budget
            .iter()
            .find(|e| e.min_resolution == 0 || e.min_slices == 0 || e.format == PixelFormat::Unknown)
        {
            return Err(StreamingError::InvalidConfig(format!(
                "degenerate minimum budget entry {entry:?}"
            )));
        }
        Ok(())
    }

    /// Minimum budget entries, biggest first.
    pub fn sorted_minimum_budget(&self, row_alignment: u32) -> Vec<BudgetEntry> {
        let mut entries: Vec<BudgetEntry> = self
            .minimum_budget
            .iter()
            .map(|e| BudgetEntry::new(e.format, e.min_resolution, e.min_slices))
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.size_bytes(row_alignment)));
        entries
    }

    pub fn with_max_preload_bytes(mut self, bytes: usize) -> Self {
        self.max_preload_bytes = bytes;
        self
    }

    pub fn with_staging_max_budget_bytes(mut self, bytes: usize) -> Self {
        self.staging_max_budget_bytes = bytes;
        self
    }

    pub fn with_max_bytes_per_staging_request(mut self, bytes: usize) -> Self {
        self.max_bytes_per_staging_request = bytes;
        self
    }

    pub fn with_minimum_budget(mut self, entries: Vec<BudgetEntry>) -> Self {
        self.minimum_budget = entries;
        self
    }

    pub fn with_max_split_resolution(mut self, resolution: u32) -> Self {
        self.max_split_resolution = resolution;
        self
    }

    pub fn with_entries_per_iteration(mut self, entries: usize) -> Self {
        self.entries_per_iteration = entries;
        self
    }

    pub fn with_try_lock_failure_limit(mut self, limit: u32) -> Self {
        self.try_lock_failure_limit = limit;
        self
    }

    pub fn with_metadata_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_cache_path = Some(path.into());
        self
    }

    pub fn with_decode_threads(mut self, threads: usize) -> Self {
        self.decode_threads = threads;
        self
    }

    pub fn with_no_reorder(mut self, no_reorder: bool) -> Self {
        self.no_reorder = no_reorder;
        self
    }

    pub fn with_texture_pool_slices(mut self, slices: u32) -> Self {
        self.texture_pool_slices = slices;
        self
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, StreamingError> {
    value
        .trim()
        .parse()
        .map_err(|_| StreamingError::InvalidConfig(format!("{key}: '{value}' is not a number")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, StreamingError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(StreamingError::InvalidConfig(format!(
            "{key}: '{value}' is not a boolean"
        ))),
    }
}
