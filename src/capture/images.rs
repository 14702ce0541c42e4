//! Image readiness before rasterization

use crate::dom::DomElement;
use crate::logging::ExportLogger;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

#[async_trait]
pub trait ImageLoader: Send + Sync {
    /// Resolve once `src` is decoded and ready to paint
    async fn load(&self, src: &str) -> Result<()>;
}

/// Treats every image as already loaded
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopImageLoader;

#[async_trait]
impl ImageLoader for NoopImageLoader {
    async fn load(&self, _src: &str) -> Result<()> {
        Ok(())
    }
}

/// Decodes inline `data:` images and files below `base_dir`.
/// Remote URLs are not fetched.
#[derive(Debug, Clone, Default)]
pub struct LocalImageLoader {
    pub base_dir: Option<PathBuf>,
}

impl LocalImageLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    async fn read_bytes(&self, src: &str) -> Result<Vec<u8>> {
        if let Some(rest) = src.strip_prefix("data:") {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| anyhow!("malformed data URL"))?;
            if !meta.ends_with(";base64") {
                bail!("only base64 data URLs carry image bytes");
            }
            return STANDARD.decode(payload).context("invalid base64 payload");
        }
        if src.starts_with("http://") || src.starts_with("https://") {
            bail!("remote image not fetched: {}", src);
        }

        let relative = src.trim_start_matches("file://");
        let path = match &self.base_dir {
            Some(dir) => dir.join(relative.trim_start_matches('/')),
            None => PathBuf::from(relative),
        };
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read image {}", path.display()))
    }
}

#[async_trait]
impl ImageLoader for LocalImageLoader {
    async fn load(&self, src: &str) -> Result<()> {
        let bytes = self.read_bytes(src).await?;
        tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .context("image decode task failed")?
            .context("image decode failed")?;
        Ok(())
    }
}

/// Wait for every `<img>` under `root`, at most `timeout` each. A slow or
/// broken image never fails the capture; it is painted as whatever the
/// rasterizer does with an unloaded image.
pub async fn wait_for_images(
    root: &DomElement,
    loader: &dyn ImageLoader,
    timeout: Duration,
    logger: &ExportLogger,
) -> usize {
    let sources: Vec<String> = root
        .find_all_by_tag("img")
        .into_iter()
        .filter_map(|img| img.attr("src"))
        .filter(|src| !src.is_empty())
        .map(str::to_string)
        .collect();

    let mut ready = 0;
    for src in &sources {
        let shown: String = src.chars().take(80).collect();
        match tokio::time::timeout(timeout, loader.load(src)).await {
            Ok(Ok(())) => ready += 1,
            Ok(Err(e)) => logger.debug(
                "Image failed to load",
                Some(&json!({ "src": shown, "error": e.to_string() })),
            ),
            Err(_) => logger.debug(
                "Image load timed out",
                Some(&json!({ "src": shown, "timeoutMs": timeout.as_millis() as u64 })),
            ),
        }
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterBitmap;

    struct SlowLoader;

    #[async_trait]
    impl ImageLoader for SlowLoader {
        async fn load(&self, _src: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timeout_does_not_block() {
        let root = DomElement::new("div")
            .with_child(DomElement::new("img").with_attr("src", "a.png"))
            .with_child(DomElement::new("img").with_attr("src", "b.png"));
        let started = std::time::Instant::now();
        let ready = wait_for_images(
            &root,
            &SlowLoader,
            Duration::from_millis(20),
            &ExportLogger::default(),
        )
        .await;
        assert_eq!(ready, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_data_url_decodes() {
        let url = RasterBitmap::filled(4, 4, [255, 0, 0, 255])
            .unwrap()
            .to_data_url()
            .unwrap();
        assert!(LocalImageLoader::default().load(&url).await.is_ok());
        assert!(LocalImageLoader::default().load("data:image/png;base64,AAAA").await.is_err());
    }

    #[tokio::test]
    async fn test_file_relative_to_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let png = RasterBitmap::filled(3, 3, [0, 0, 0, 255]).unwrap().to_png().unwrap();
        std::fs::write(dir.path().join("logo.png"), png).unwrap();

        let loader = LocalImageLoader::new(dir.path());
        assert!(loader.load("/logo.png").await.is_ok());
        assert!(loader.load("missing.png").await.is_err());
        assert!(loader.load("https://cdn.example.com/x.png").await.is_err());
    }
}
