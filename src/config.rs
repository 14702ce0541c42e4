//! Export configuration
//!
//! All sections are optional in the JSON form; missing values fall back to
//! the defaults below.

use crate::error::{ExportError, Result};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Page geometry
// ============================================================================

/// Page size and outer margin, in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageGeometry {
    pub width_mm: f32,
    pub height_mm: f32,
    pub margin_mm: f32,
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::a4_portrait()
    }
}

impl PageGeometry {
    pub const A4_WIDTH_MM: f32 = 210.0;
    pub const A4_HEIGHT_MM: f32 = 297.0;
    pub const DEFAULT_MARGIN_MM: f32 = 10.0;

    pub fn a4_portrait() -> Self {
        Self {
            width_mm: Self::A4_WIDTH_MM,
            height_mm: Self::A4_HEIGHT_MM,
            margin_mm: Self::DEFAULT_MARGIN_MM,
        }
    }

    pub fn content_width(&self) -> f32 {
        self.width_mm - 2.0 * self.margin_mm
    }

    pub fn content_height(&self) -> f32 {
        self.height_mm - 2.0 * self.margin_mm
    }

    fn validate(&self) -> Result<()> {
        if self.width_mm <= 0.0 || self.height_mm <= 0.0 {
            return Err(ExportError::Config(format!(
                "page size must be positive, got {}x{}mm",
                self.width_mm, self.height_mm
            )));
        }
        if self.margin_mm < 0.0 || self.content_width() <= 0.0 || self.content_height() <= 0.0 {
            return Err(ExportError::Config(format!(
                "margin {}mm leaves no content area",
                self.margin_mm
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Capture
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    pub direct_scale: f32,
    pub container_scale: f32,
    pub simple_scale: f32,
    /// Width of the off-screen container used by the container strategy
    pub container_width_px: u32,
    /// Upper bound for each embedded image to finish loading
    pub image_timeout_ms: u64,
    /// Side of the top-left block sampled by the content check
    pub content_sample_px: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            direct_scale: 1.2,
            container_scale: 1.1,
            simple_scale: 1.0,
            container_width_px: 1200,
            image_timeout_ms: 2000,
            content_sample_px: 100,
        }
    }
}

impl CaptureConfig {
    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        for (name, scale) in [
            ("directScale", self.direct_scale),
            ("containerScale", self.container_scale),
            ("simpleScale", self.simple_scale),
        ] {
            if !(scale > 0.0 && scale.is_finite()) {
                return Err(ExportError::Config(format!("{} must be positive", name)));
            }
        }
        if self.container_width_px == 0 || self.content_sample_px == 0 {
            return Err(ExportError::Config(
                "containerWidthPx and contentSamplePx must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Print & output
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrintConfig {
    /// How long to wait for the print window's load event before printing anyway
    pub load_fallback_ms: u64,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            load_fallback_ms: 1000,
        }
    }
}

impl PrintConfig {
    pub fn load_fallback(&self) -> Duration {
        Duration::from_millis(self.load_fallback_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    /// Where downloads land; the user's download directory when unset
    pub directory: Option<PathBuf>,
}

impl OutputConfig {
    pub fn resolve_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(std::env::temp_dir)
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportConfig {
    pub page: PageGeometry,
    pub capture: CaptureConfig,
    pub print: PrintConfig,
    pub output: OutputConfig,
    pub log: LogConfig,
    /// Currency used when the dataset filters do not name one
    pub currency: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page: PageGeometry::default(),
            capture: CaptureConfig::default(),
            print: PrintConfig::default(),
            output: OutputConfig::default(),
            log: LogConfig::default(),
            currency: "EUR".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ExportError::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExportError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.page.validate()?;
        self.capture.validate()?;
        if self.currency.trim().is_empty() {
            return Err(ExportError::Config("currency must not be empty".to_string()));
        }
        Ok(())
    }
}
