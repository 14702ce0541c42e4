//! DOM capture
//!
//! Turns a region of the live document into a `RasterBitmap`. The target is
//! validated once, then each `CaptureStrategy` gets a go in order; the first
//! bitmap with visible pixels wins. Failed attempts are collected and only
//! surface as a single `CaptureError` when every strategy has failed.

pub mod images;
pub mod strategies;

use crate::config::CaptureConfig;
use crate::dom::style::Rgba;
use crate::dom::{Document, DomElement};
use crate::error::{CaptureError, ExportError, Result, StrategyFailure, ValidationError};
use crate::logging::ExportLogger;
use crate::overlay::Annotations;
use crate::raster::RasterBitmap;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub use images::{ImageLoader, LocalImageLoader, NoopImageLoader};
pub use strategies::{
    default_strategies, CaptureStrategy, ContainerStrategy, DirectStrategy, OffscreenContainer,
    SimpleStrategy,
};

/// Options handed to the rasterizer
#[derive(Debug, Clone, PartialEq)]
pub struct RasterOptions {
    pub scale: f32,
    /// `None` keeps the canvas transparent where nothing is painted
    pub background: Option<Rgba>,
    /// Request cross-origin images with CORS headers
    pub use_cors: bool,
    /// Paint cross-origin images that came back without CORS approval
    pub allow_taint: bool,
    /// Layout width when the element carries no box of its own
    pub window_width: Option<u32>,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            scale: 1.0,
            background: Some(Rgba::WHITE),
            use_cors: true,
            allow_taint: true,
            window_width: None,
        }
    }
}

/// Paints an element into a bitmap.
///
/// Implementations that fetch cross-origin images honor `use_cors` and
/// `allow_taint`; the bundled `BlockRasterizer` never fetches and ignores both.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, element: &DomElement, options: &RasterOptions) -> anyhow::Result<RasterBitmap>;
}

/// Everything a strategy needs for one attempt
pub struct CaptureContext<'a> {
    pub document: &'a Document,
    pub target: &'a DomElement,
    pub annotations: &'a Annotations,
    pub config: &'a CaptureConfig,
    pub rasterizer: &'a dyn Rasterizer,
    pub images: &'a dyn ImageLoader,
    pub logger: &'a ExportLogger,
}

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub bitmap: RasterBitmap,
    /// Name of the strategy that produced the bitmap
    pub strategy: &'static str,
    /// Attempts that failed before it
    pub failures: Vec<StrategyFailure>,
}

pub struct DomCaptureEngine {
    config: CaptureConfig,
    rasterizer: Arc<dyn Rasterizer>,
    images: Arc<dyn ImageLoader>,
    strategies: Vec<Box<dyn CaptureStrategy>>,
    logger: ExportLogger,
}

impl DomCaptureEngine {
    pub fn new(config: CaptureConfig, rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self {
            config,
            rasterizer,
            images: Arc::new(NoopImageLoader),
            strategies: default_strategies(),
            logger: ExportLogger::default(),
        }
    }

    /// Swap the rasterizer, keeping loader, strategies and logger
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_image_loader(mut self, images: Arc<dyn ImageLoader>) -> Self {
        self.images = images;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn CaptureStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_logger(mut self, logger: ExportLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Capture the element with id `element_id`
    pub async fn capture(
        &self,
        document: &Document,
        element_id: &str,
        annotations: &Annotations,
    ) -> Result<CaptureOutcome> {
        let target = document
            .get_element_by_id(element_id)
            .ok_or_else(|| ValidationError::MissingElement(element_id.to_string()))?;
        self.capture_element(document, target, annotations).await
    }

    pub async fn capture_element(
        &self,
        document: &Document,
        target: &DomElement,
        annotations: &Annotations,
    ) -> Result<CaptureOutcome> {
        validate_target(target)?;

        let size = target.offset_size();
        self.logger.debug(
            "Capture target",
            Some(&json!({
                "tag": target.tag,
                "id": target.id(),
                "offsetWidth": size.width,
                "offsetHeight": size.height,
                "textLength": target.text_length(),
            })),
        );

        let ctx = CaptureContext {
            document,
            target,
            annotations,
            config: &self.config,
            rasterizer: self.rasterizer.as_ref(),
            images: self.images.as_ref(),
            logger: &self.logger,
        };

        let mut failures = Vec::new();
        for strategy in &self.strategies {
            match strategy.capture(&ctx).await {
                Ok(bitmap) => {
                    self.logger.debug(
                        "Capture succeeded",
                        Some(&json!({
                            "strategy": strategy.name(),
                            "width": bitmap.width(),
                            "height": bitmap.height(),
                            "failedAttempts": failures.len(),
                        })),
                    );
                    return Ok(CaptureOutcome {
                        bitmap,
                        strategy: strategy.name(),
                        failures,
                    });
                }
                Err(failure) => {
                    self.logger.debug(
                        "Capture strategy failed",
                        Some(&json!({
                            "strategy": failure.strategy,
                            "reason": failure.reason,
                            "observed": failure.observed,
                        })),
                    );
                    failures.push(failure);
                }
            }
        }

        Err(ExportError::Capture(CaptureError::AllStrategiesFailed {
            attempts: failures,
        }))
    }
}

/// Reject targets no strategy could ever capture
pub fn validate_target(target: &DomElement) -> std::result::Result<(), ValidationError> {
    let size = target.offset_size();
    if size.is_empty() {
        return Err(ValidationError::EmptyElement {
            width: size.width,
            height: size.height,
        });
    }
    if target.text_length() == 0 && !target.contains_media() {
        return Err(ValidationError::NoContent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogConfig;
    use crate::render::BlockRasterizer;
    use anyhow::anyhow;
    use log::Level;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, Once};

    thread_local! {
        static RECORDS: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
    }

    /// Keeps records per thread so parallel tests don't see each other
    struct ThreadLog;

    impl log::Log for ThreadLog {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            RECORDS.with(|r| r.borrow_mut().push((record.level(), record.args().to_string())));
        }

        fn flush(&self) {}
    }

    static THREAD_LOG: ThreadLog = ThreadLog;

    fn start_recording() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            if log::set_logger(&THREAD_LOG).is_ok() {
                log::set_max_level(log::LevelFilter::Trace);
            }
        });
        RECORDS.with(|r| r.borrow_mut().clear());
    }

    fn recorded() -> Vec<(Level, String)> {
        RECORDS.with(|r| r.borrow().clone())
    }

    /// Succeeds only on the last attempt, remembering the options of each
    #[derive(Default)]
    struct RecordingRasterizer {
        seen: Mutex<Vec<RasterOptions>>,
    }

    #[async_trait]
    impl Rasterizer for RecordingRasterizer {
        async fn rasterize(&self, _el: &DomElement, o: &RasterOptions) -> anyhow::Result<RasterBitmap> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(o.clone());
            if seen.len() < 3 {
                return Err(anyhow!("canvas tainted"));
            }
            Ok(RasterBitmap::filled(200, 100, [255, 255, 255, 255])?)
        }
    }

    const REPORT: &str = r#"<div id="report">
        <h2>Patrimoine global</h2>
        <p>Total : 125 000 EUR</p>
        <script>track()</script>
    </div>"#;

    struct FailingRasterizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Rasterizer for FailingRasterizer {
        async fn rasterize(&self, _el: &DomElement, _o: &RasterOptions) -> anyhow::Result<RasterBitmap> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("canvas tainted"))
        }
    }

    struct TransparentRasterizer;

    #[async_trait]
    impl Rasterizer for TransparentRasterizer {
        async fn rasterize(&self, _el: &DomElement, _o: &RasterOptions) -> anyhow::Result<RasterBitmap> {
            Ok(RasterBitmap::filled(300, 200, [0, 0, 0, 0])?)
        }
    }

    /// Fails the direct attempt, records how many off-screen mounts are live
    struct ObservingRasterizer {
        document: Arc<Document>,
        seen_offscreen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Rasterizer for ObservingRasterizer {
        async fn rasterize(&self, el: &DomElement, o: &RasterOptions) -> anyhow::Result<RasterBitmap> {
            self.seen_offscreen
                .lock()
                .unwrap()
                .push(self.document.offscreen_count());
            if o.window_width.is_none() {
                return Err(anyhow!("direct render failed"));
            }
            assert!(el.find_all_by_tag("script").is_empty());
            Ok(RasterBitmap::filled(1200, 400, [255, 255, 255, 255])?)
        }
    }

    fn engine(rasterizer: Arc<dyn Rasterizer>) -> DomCaptureEngine {
        DomCaptureEngine::new(CaptureConfig::default(), rasterizer)
    }

    #[tokio::test]
    async fn test_direct_capture_with_block_rasterizer() {
        let document = Document::from_html(REPORT, 800);
        let outcome = engine(Arc::new(BlockRasterizer::default()))
            .capture(&document, "report", &Annotations::default().title("Synthèse"))
            .await
            .unwrap();
        assert_eq!(outcome.strategy, "direct");
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.bitmap.width(), 960);
        // The live tree keeps its script
        assert_eq!(document.body().find_all_by_tag("script").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_element() {
        let document = Document::from_html(REPORT, 800);
        let err = engine(Arc::new(BlockRasterizer::default()))
            .capture(&document, "nope", &Annotations::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExportError::Validation(ValidationError::MissingElement(ref id)) if id == "nope"
        ));
    }

    #[tokio::test]
    async fn test_zero_size_rejected_before_any_strategy() {
        let document = Document::new(
            DomElement::new("div")
                .with_id("report")
                .with_text("Patrimoine")
                .with_layout(0, 0),
        );
        let rasterizer = Arc::new(FailingRasterizer {
            calls: AtomicUsize::new(0),
        });
        let err = engine(rasterizer.clone())
            .capture(&document, "report", &Annotations::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExportError::Validation(ValidationError::EmptyElement { width: 0, height: 0 })
        ));
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_target_content() {
        let empty = DomElement::new("div").with_layout(100, 100);
        assert_eq!(validate_target(&empty), Err(ValidationError::NoContent));

        let chart = DomElement::new("div")
            .with_layout(100, 100)
            .with_child(DomElement::new("svg"));
        assert!(validate_target(&chart).is_ok());
    }

    #[tokio::test]
    async fn test_all_strategies_fail_and_container_is_removed() {
        let document = Document::from_html(REPORT, 800);
        let rasterizer = Arc::new(FailingRasterizer {
            calls: AtomicUsize::new(0),
        });
        let err = engine(rasterizer.clone())
            .capture(&document, "report", &Annotations::default())
            .await
            .unwrap_err();

        match &err {
            ExportError::Capture(CaptureError::AllStrategiesFailed { attempts }) => {
                let names: Vec<_> = attempts.iter().map(|a| a.strategy).collect();
                assert_eq!(names, ["direct", "container", "simple"]);
                assert!(attempts.iter().all(|a| a.reason.contains("canvas tainted")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.user_message(), crate::error::CAPTURE_USER_MESSAGE);
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(document.offscreen_count(), 0);
    }

    #[tokio::test]
    async fn test_transparent_bitmaps_are_failures() {
        let document = Document::from_html(REPORT, 800);
        let err = engine(Arc::new(TransparentRasterizer))
            .capture(&document, "report", &Annotations::default())
            .await
            .unwrap_err();
        match err {
            ExportError::Capture(CaptureError::AllStrategiesFailed { attempts }) => {
                assert_eq!(attempts.len(), 3);
                assert_eq!(attempts[0].observed, Some((300, 200)));
                assert!(attempts[0].text_length > 0);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_container_fallback_mounts_and_detaches() {
        let document = Arc::new(Document::from_html(REPORT, 800));
        let rasterizer = Arc::new(ObservingRasterizer {
            document: document.clone(),
            seen_offscreen: Mutex::new(Vec::new()),
        });
        let outcome = engine(rasterizer.clone())
            .capture(&document, "report", &Annotations::default())
            .await
            .unwrap();

        assert_eq!(outcome.strategy, "container");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].strategy, "direct");
        assert_eq!(*rasterizer.seen_offscreen.lock().unwrap(), vec![0, 1]);
        assert_eq!(document.offscreen_count(), 0);
    }

    #[tokio::test]
    async fn test_simple_strategy_relaxes_cors() {
        let document = Document::from_html(REPORT, 800);
        let rasterizer = Arc::new(RecordingRasterizer::default());
        let outcome = engine(rasterizer.clone())
            .capture(&document, "report", &Annotations::default())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, "simple");

        let seen = rasterizer.seen.lock().unwrap();
        let scales: Vec<_> = seen.iter().map(|o| o.scale).collect();
        assert_eq!(scales, [1.2, 1.1, 1.0]);
        assert!(seen[0].use_cors && seen[0].allow_taint);
        assert!(seen[1].use_cors && seen[1].allow_taint);
        assert!(!seen[2].use_cors);
        assert!(seen[2].allow_taint);
    }

    #[tokio::test]
    async fn test_style_injection_failure_moves_to_next_strategy() {
        let document = Document::new(
            DomElement::new("div").with_child(
                DomElement::new("img")
                    .with_id("chart")
                    .with_attr("src", "x.png")
                    .with_layout(200, 100),
            ),
        );
        let rasterizer = Arc::new(FailingRasterizer {
            calls: AtomicUsize::new(0),
        });
        let err = engine(rasterizer.clone())
            .capture(&document, "chart", &Annotations::default())
            .await
            .unwrap_err();

        match err {
            ExportError::Capture(CaptureError::AllStrategiesFailed { attempts }) => {
                assert_eq!(attempts.len(), 3);
                assert!(attempts
                    .iter()
                    .all(|a| a.reason.starts_with("style injection failed")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(document.offscreen_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_inline_color_does_not_break_capture() {
        let document = Document::from_html(
            r##"<div id="r"><p style="color: #aé123">Total</p></div>"##,
            800,
        );
        let outcome = engine(Arc::new(BlockRasterizer::default()))
            .capture(&document, "r", &Annotations::default())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, "direct");
    }

    #[tokio::test]
    async fn test_strategy_failures_logged_at_debug() {
        start_recording();
        let document = Document::from_html(REPORT, 800);
        let logger = ExportLogger::new(&LogConfig {
            level: "debug".to_string(),
            ..LogConfig::default()
        });
        let _ = engine(Arc::new(FailingRasterizer {
            calls: AtomicUsize::new(0),
        }))
        .with_logger(logger)
        .capture(&document, "report", &Annotations::default())
        .await
        .unwrap_err();

        let records = recorded();
        let failures: Vec<_> = records
            .iter()
            .filter(|(_, msg)| msg.starts_with("Capture strategy failed"))
            .collect();
        assert_eq!(failures.len(), 3);
        assert!(failures.iter().all(|(level, _)| *level == Level::Debug));
    }

    #[tokio::test]
    async fn test_custom_strategy_order() {
        let document = Document::from_html(REPORT, 800);
        let engine = engine(Arc::new(BlockRasterizer::default()))
            .with_strategies(vec![Box::new(SimpleStrategy)]);
        assert_eq!(engine.strategy_names(), ["simple"]);
        let outcome = engine
            .capture(&document, "report", &Annotations::default())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, "simple");
        assert_eq!(outcome.bitmap.width(), 800);
    }
}
