//! Export error taxonomy
//!
//! Every export attempt ends with at most one `ExportError`. Internal capture
//! strategies never surface their own failures; they are folded into
//! `CaptureError::AllStrategiesFailed` once the cascade is exhausted.

use serde::Serialize;
use thiserror::Error;

/// User-facing message for any capture failure.
pub const CAPTURE_USER_MESSAGE: &str = "Impossible de capturer le contenu";

/// Client misuse, detected before any heavy work starts
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("element '{0}' not found")]
    MissingElement(String),
    #[error("element is empty or invisible ({width}x{height})")]
    EmptyElement { width: u32, height: u32 },
    #[error("element has no content to capture")]
    NoContent,
    #[error("dataset contains no assets")]
    EmptyDataset,
    #[error("workbook contains no sheets")]
    EmptyWorkbook,
    #[error("bitmap has zero dimensions ({width}x{height})")]
    EmptyBitmap { width: u32, height: u32 },
}

/// One failed capture attempt, kept for developer diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub reason: String,
    /// Bitmap size produced by the attempt, if it produced one
    pub observed: Option<(u32, u32)>,
    /// Length of the target's text content
    pub text_length: usize,
}

impl std::fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)?;
        if let Some((w, h)) = self.observed {
            write!(f, " (bitmap {}x{})", w, h)?;
        }
        write!(f, " [text length {}]", self.text_length)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    #[error("all capture strategies failed: {}", format_attempts(.attempts))]
    AllStrategiesFailed { attempts: Vec<StrategyFailure> },
}

fn format_attempts(attempts: &[StrategyFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PrintError {
    #[error("print window was blocked")]
    PopupBlocked,
    #[error("print target '{0}' not found")]
    TargetMissing(String),
    #[error("printing failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("image captured but empty: {0}")]
    Encoding(String),

    #[error("{format} export failed: {message}")]
    Serialization {
        format: &'static str,
        message: String,
    },

    #[error(transparent)]
    Print(#[from] PrintError),

    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ExportError {
    pub fn serialization(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            format,
            message: err.to_string(),
        }
    }

    /// Single human-readable message for the alert/toast shown after a failed export
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(ValidationError::MissingElement(_)) => {
                "Élément introuvable. Veuillez rafraîchir la page.".to_string()
            }
            Self::Validation(ValidationError::EmptyDataset) => {
                "Aucune donnée à exporter.".to_string()
            }
            Self::Validation(ValidationError::EmptyElement { .. })
            | Self::Validation(ValidationError::NoContent) => {
                "Le contenu à exporter est vide ou invisible.".to_string()
            }
            Self::Validation(_) => "Les données d'export sont invalides.".to_string(),
            Self::Capture(_) => CAPTURE_USER_MESSAGE.to_string(),
            Self::Encoding(_) => "L'image capturée est vide.".to_string(),
            Self::Serialization { .. } | Self::Io(_) | Self::Config(_) => {
                "L'export a échoué.".to_string()
            }
            Self::Print(PrintError::PopupBlocked) => {
                "Veuillez autoriser les fenêtres pop-up pour imprimer.".to_string()
            }
            Self::Print(PrintError::TargetMissing(_)) => {
                "Élément introuvable. Veuillez rafraîchir la page.".to_string()
            }
            Self::Print(PrintError::Failed(_)) => "L'impression a échoué.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
