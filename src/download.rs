//! Delivery of finished exports
//!
//! A sink receives the complete byte payload once serialization has
//! succeeded, so a failed export never produces a file.

use crate::error::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

const FALLBACK_BASE_NAME: &str = "export";
const MAX_BASE_NAME_CHARS: usize = 120;

/// A finished export ready to hand to the user
#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub base_name: String,
    pub extension: &'static str,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl Download {
    pub fn new(base_name: &str, extension: &'static str, mime: &'static str, bytes: Vec<u8>) -> Self {
        Self {
            base_name: base_name.to_string(),
            extension,
            mime,
            bytes,
        }
    }

    /// `<sanitized base>.<extension>`
    pub fn file_name(&self) -> String {
        format!("{}.{}", sanitize_filename(&self.base_name), self.extension)
    }
}

pub trait DownloadSink: Send + Sync {
    /// Deliver the payload; returns where it ended up
    fn deliver(&self, download: &Download) -> Result<PathBuf>;
}

/// Writes into a directory, replacing any previous file of the same name
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for DirectorySink {
    fn deliver(&self, download: &Download) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let target = self.dir.join(download.file_name());

        // Written next to the target, then renamed into place; dropping the
        // temp file on any error removes it.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&download.bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;

        log::info!(
            "Export written to {} ({} bytes, {})",
            target.display(),
            download.bytes.len(),
            download.mime
        );
        Ok(target)
    }
}

/// Keeps deliveries in memory, for embedding callers that stream bytes themselves
#[derive(Debug, Default)]
pub struct MemorySink {
    deliveries: Mutex<Vec<Download>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Download> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl DownloadSink for MemorySink {
    fn deliver(&self, download: &Download) -> Result<PathBuf> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(download.clone());
        Ok(PathBuf::from(download.file_name()))
    }
}

/// Sanitize a base name to be safe for filesystem operations
pub fn sanitize_filename(filename: &str) -> String {
    let sanitized: String = filename
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
        .take(MAX_BASE_NAME_CHARS)
        .collect();
    let sanitized = sanitized.trim_end_matches('.');

    // Ensure it doesn't start with a dot (hidden file)
    let sanitized = if sanitized.starts_with('.') {
        format!("_{}", sanitized.trim_start_matches('.'))
    } else {
        sanitized.to_string()
    };

    if sanitized.chars().all(|c| c == '_' || c == '.') {
        FALLBACK_BASE_NAME.to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Rapport patrimonial 2024"), "Rapport_patrimonial_2024");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_etcpasswd");
        assert_eq!(sanitize_filename(".hidden"), "_hidden");
        assert_eq!(sanitize_filename("bilan<>:\"|?*"), "bilan");
        assert_eq!(sanitize_filename("Synthèse"), "Synthèse");
        assert_eq!(sanitize_filename("   "), "export");
        assert_eq!(sanitize_filename("///"), "export");
    }

    #[test]
    fn test_directory_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let download = Download::new("bilan 2024", "csv", "text/csv;charset=utf-8;", b"a,b\r\n".to_vec());

        let path = sink.deliver(&download).unwrap();
        assert_eq!(path, dir.path().join("bilan_2024.csv"));
        assert_eq!(std::fs::read(&path).unwrap(), b"a,b\r\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_delivery_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the way makes the final rename fail
        std::fs::create_dir(dir.path().join("rapport.pdf")).unwrap();
        std::fs::write(dir.path().join("rapport.pdf").join("keep"), b"x").unwrap();

        let sink = DirectorySink::new(dir.path());
        let err = sink
            .deliver(&Download::new("rapport", "pdf", "application/pdf", vec![1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, ExportError::Io(_)));

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["rapport.pdf"]);
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        let path = sink
            .deliver(&Download::new("x", "pdf", "application/pdf", vec![0]))
            .unwrap();
        assert_eq!(path, PathBuf::from("x.pdf"));
        assert_eq!(sink.deliveries().len(), 1);
    }
}
