//! Print through a separate window
//!
//! The target's markup is copied into a fresh, self-contained document
//! with the print stylesheet, printed, and the window is closed again.

use crate::config::PrintConfig;
use crate::dom::{escape_text, Document};
use crate::error::{ExportError, PrintError, Result};
use crate::download::sanitize_filename;
use crate::logging::ExportLogger;
use crate::overlay::{PrintStyleOverlay, PRINT_WINDOW_CSS};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait PrintWindow: Send {
    fn write_document(&mut self, html: &str) -> anyhow::Result<()>;

    /// Resolves on the window's load event
    async fn wait_for_load(&mut self) -> anyhow::Result<()>;

    async fn print(&mut self) -> anyhow::Result<()>;

    fn close(&mut self);
}

pub trait PrintHost: Send + Sync {
    /// `None` when the window could not be opened (popup blocked)
    fn open_window(&self, title: &str) -> Option<Box<dyn PrintWindow>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintOutcome {
    /// False when printing went ahead on the fallback timer
    pub load_event_seen: bool,
}

pub struct PrintWindowAdapter {
    host: Arc<dyn PrintHost>,
    config: PrintConfig,
    logger: ExportLogger,
}

impl PrintWindowAdapter {
    pub fn new(host: Arc<dyn PrintHost>, config: PrintConfig) -> Self {
        Self {
            host,
            config,
            logger: ExportLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: ExportLogger) -> Self {
        self.logger = logger;
        self
    }

    pub async fn print(&self, document: &Document, element_id: &str, title: &str) -> Result<PrintOutcome> {
        let target = document
            .get_element_by_id(element_id)
            .ok_or_else(|| PrintError::TargetMissing(element_id.to_string()))?;

        let mut body = target.clone();
        PrintStyleOverlay::strip_active_content(&mut body);
        let html = print_document(title, &body.inner_html());

        let mut window = self.host.open_window(title).ok_or(PrintError::PopupBlocked)?;
        let result = self.drive(window.as_mut(), &html).await;
        window.close();

        result.map_err(|e| ExportError::Print(PrintError::Failed(format!("{:#}", e))))
    }

    async fn drive(&self, window: &mut dyn PrintWindow, html: &str) -> anyhow::Result<PrintOutcome> {
        window.write_document(html).context("failed to write print document")?;

        let fallback = self.config.load_fallback();
        let load_event_seen = match tokio::time::timeout(fallback, window.wait_for_load()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.logger.warn(
                    "Print window reported a load error, printing anyway",
                    Some(&json!({ "error": format!("{:#}", e) })),
                );
                false
            }
            Err(_) => {
                self.logger.info(
                    "Print window load event not seen, printing on fallback timer",
                    Some(&json!({ "fallbackMs": fallback.as_millis() as u64 })),
                );
                false
            }
        };

        window.print().await.context("print call failed")?;
        Ok(PrintOutcome { load_event_seen })
    }
}

/// Self-contained HTML document for the print window
pub fn print_document(title: &str, body_html: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"fr\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_text(title),
        PRINT_WINDOW_CSS,
        body_html
    )
}

// ============================================================================
// Spool host
// ============================================================================

/// Prints by spooling the document as an HTML file into a directory.
/// Opening fails (reported as a blocked popup) when the directory cannot
/// be created.
#[derive(Debug, Clone)]
pub struct SpoolPrintHost {
    dir: PathBuf,
}

impl SpoolPrintHost {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PrintHost for SpoolPrintHost {
    fn open_window(&self, title: &str) -> Option<Box<dyn PrintWindow>> {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            log::warn!("Cannot open spool directory {}: {}", self.dir.display(), e);
            return None;
        }
        let file_name = format!("{}-{}.html", sanitize_filename(title), Uuid::new_v4().simple());
        Some(Box::new(SpoolWindow {
            path: self.dir.join(file_name),
            document: None,
        }))
    }
}

struct SpoolWindow {
    path: PathBuf,
    document: Option<String>,
}

#[async_trait]
impl PrintWindow for SpoolWindow {
    fn write_document(&mut self, html: &str) -> anyhow::Result<()> {
        self.document = Some(html.to_string());
        Ok(())
    }

    async fn wait_for_load(&mut self) -> anyhow::Result<()> {
        // Static markup, loaded as soon as it is written
        Ok(())
    }

    async fn print(&mut self) -> anyhow::Result<()> {
        let html = self
            .document
            .as_deref()
            .context("nothing was written to the print window")?;
        tokio::fs::write(&self.path, html)
            .await
            .with_context(|| format!("failed to spool {}", self.path.display()))?;
        log::info!("Print job spooled to {}", self.path.display());
        Ok(())
    }

    fn close(&mut self) {
        self.document = None;
    }
}
