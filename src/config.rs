//! Runtime configuration.
//!
//! Defaults reproduce the parameters the PPP stitching was tuned with; any of
//! them can be overridden from a TOML file.

use std::fs;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::fields::FieldCategory;

/// How the values of two overlapping series are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchMethod {
    SimpleMean,
    SmoothedMean { window: usize, order: usize },
    ErrorMean,
}

impl StitchMethod {
    /// Provenance string stored with every stitched field.
    pub fn action(&self) -> String {
        match self {
            StitchMethod::SmoothedMean { window, order } => format!(
                "stitched and replaced daily discontinuities with smooth(savgol filter, window:{}, order:{}) mean",
                window, order
            ),
            StitchMethod::SimpleMean => {
                "stitched and replaced daily discontinuities with simple mean".to_string()
            }
            StitchMethod::ErrorMean => "stitched and replaced daily discontinuities \
                 with error mean (sqrt(errorA^2 + errorB^2))"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Savitzky-Golay window, in samples. Must be odd.
    pub window_length: usize,
    pub poly_order: usize,
    /// Extra span added on both sides of a run-pair intersection.
    pub overlap_margin_hours: i64,
    /// Year tail starts this long before New Year.
    pub year_tail_hours: i64,
    /// Year head ends this long after New Year.
    pub year_head_hours: i64,
    pub sampling_minutes: i64,
}

impl Default for StitchConfig {
    fn default() -> Self {
        StitchConfig {
            window_length: 25,
            poly_order: 3,
            overlap_margin_hours: 3,
            year_tail_hours: 6,
            year_head_hours: 6,
            sampling_minutes: 5,
        }
    }
}

impl StitchConfig {
    pub fn method_for(&self, category: FieldCategory) -> StitchMethod {
        match category {
            FieldCategory::Smoothed => StitchMethod::SmoothedMean {
                window: self.window_length,
                order: self.poly_order,
            },
            FieldCategory::Positional => StitchMethod::SimpleMean,
            FieldCategory::Error => StitchMethod::ErrorMean,
        }
    }

    pub fn overlap_margin(&self) -> Duration {
        Duration::hours(self.overlap_margin_hours)
    }

    pub fn year_tail(&self) -> Duration {
        Duration::hours(self.year_tail_hours)
    }

    pub fn year_head(&self) -> Duration {
        Duration::hours(self.year_head_hours)
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::minutes(self.sampling_minutes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_length % 2 == 0 {
            return Err(PipelineError::Config(format!(
                "window_length must be odd, got {}",
                self.window_length
            )));
        }
        if self.poly_order >= self.window_length {
            return Err(PipelineError::Config(format!(
                "poly_order {} must be less than window_length {}",
                self.poly_order, self.window_length
            )));
        }
        if self.sampling_minutes <= 0 {
            return Err(PipelineError::Config(
                "sampling_minutes must be positive".to_string(),
            ));
        }
        if self.overlap_margin_hours < 0 || self.year_tail_hours < 0 || self.year_head_hours < 0 {
            return Err(PipelineError::Config(
                "window offsets must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stitch: StitchConfig,
    /// Parser threads; `None` uses one per core.
    pub workers: Option<usize>,
    pub compression_level: i32,
    /// Extension of files written by successful runs.
    pub success_extension: String,
    /// Extension of run error logs.
    pub error_extension: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            stitch: StitchConfig::default(),
            workers: None,
            compression_level: 19,
            success_extension: "tdp".to_string(),
            error_extension: "err".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        self.stitch.validate()?;
        if self.workers == Some(0) {
            return Err(PipelineError::Config("workers must be at least 1".to_string()));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(PipelineError::Config(format!(
                "compression_level must be within 1..=22, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}
