//! Configuration parsing and validation for a decomposition run

use serde::{Deserialize, Serialize};
use std::fs;

use kernel::{ByteOrder, FileFormat};

/// Particles read per piece unless configured otherwise.
pub const DEFAULT_MAX_READ: usize = 8_000_000;

/// How input files map onto ranks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadMode {
    /// Files are rotated through rings of ranks; each rank keeps what it owns
    #[default]
    RoundRobin,
    /// Rank `r` reads `{base_file}.{r}` and nothing else
    OneToOne,
}

/// Parameters supplied by the reader glue for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Base path of the particle files; numbered files are `{base_file}.{n}`
    pub base_file: String,
    /// Side length of the periodic box
    pub box_size: f32,
    /// Ghost margin around each rank's alive box
    pub dead_size: f32,
    /// On-disk layout
    #[serde(default)]
    pub format: FileFormat,
    /// File-to-rank strategy
    #[serde(default)]
    pub mode: ReadMode,
    /// Largest number of particles read from a file at once
    #[serde(default = "default_max_read")]
    pub max_read: usize,
    /// Byte order of the files
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Relocate misplaced particles after one-to-one reads
    #[serde(default)]
    pub initial_exchange: bool,
}

fn default_max_read() -> usize {
    DEFAULT_MAX_READ
}

impl ReaderConfig {
    /// Configuration with defaults for everything but the required fields.
    pub fn new(base_file: impl Into<String>, box_size: f32, dead_size: f32) -> Self {
        Self {
            base_file: base_file.into(),
            box_size,
            dead_size,
            format: FileFormat::default(),
            mode: ReadMode::default(),
            max_read: DEFAULT_MAX_READ,
            byte_order: ByteOrder::default(),
            initial_exchange: false,
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        let config: ReaderConfig = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.base_file.trim().is_empty() {
            return Err("base_file must name the particle files".to_string());
        }

        if !(self.box_size > 0.0) || !self.box_size.is_finite() {
            return Err("box_size must be positive".to_string());
        }

        if !(self.dead_size >= 0.0) {
            return Err("dead_size must be non-negative".to_string());
        }
        if self.dead_size >= self.box_size {
            return Err("dead_size must be smaller than box_size".to_string());
        }

        if self.max_read == 0 {
            return Err("max_read must be at least 1".to_string());
        }

        if self.initial_exchange && self.mode != ReadMode::OneToOne {
            return Err("initial_exchange only applies to OneToOne mode".to_string());
        }

        Ok(())
    }

    /// Check the ghost margin against a rank grid of `layout_size`.
    ///
    /// Ghosts only reach the immediate neighbors, so the margin may not be
    /// wider than one sub-box along any dimension.
    pub fn validate_layout(&self, layout_size: [usize; 3]) -> Result<(), String> {
        for (dim, &size) in layout_size.iter().enumerate() {
            let sub_box = self.box_size / size as f32;
            if self.dead_size > sub_box {
                return Err(format!(
                    "dead_size {} exceeds the sub-box width {sub_box} along dimension {dim}",
                    self.dead_size
                ));
            }
        }
        Ok(())
    }
}
