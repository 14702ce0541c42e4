//! Export entry points
//!
//! `ReportExporter` wires the builders to a `DownloadSink` and gives every
//! call an id so its log lines can be correlated.

use crate::capture::{DomCaptureEngine, ImageLoader, Rasterizer};
use crate::config::ExportConfig;
use crate::csv::{CsvSerializer, CSV_MIME};
use crate::dom::Document;
use crate::download::{DirectorySink, Download, DownloadSink};
use crate::error::{ExportError, Result};
use crate::logging::ExportLogger;
use crate::models::{ReportDataset, WorkbookSpec};
use crate::pdf::{PaginatedPdfAssembler, PdfOptions};
use crate::print::{PrintHost, PrintOutcome, PrintWindowAdapter, SpoolPrintHost};
use crate::render::BlockRasterizer;
use crate::workbook::{TabularWorkbookBuilder, XLSX_MIME};
use chrono::Local;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub const PDF_MIME: &str = "application/pdf";

/// Spool directory name for the bundled print host, under the system temp dir
const PRINT_SPOOL_DIR: &str = "wealth-report-print";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Xlsx,
    Csv,
    Pdf,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Xlsx => XLSX_MIME,
            Self::Csv => CSV_MIME,
            Self::Pdf => PDF_MIME,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOutcome {
    pub export_id: Uuid,
    pub format: ExportFormat,
    pub path: PathBuf,
    pub size_bytes: usize,
    /// PDF only
    pub pages: Option<usize>,
    /// PDF only: capture strategy that produced the bitmap
    pub strategy: Option<&'static str>,
}

pub struct ReportExporter {
    config: ExportConfig,
    logger: ExportLogger,
    sink: Arc<dyn DownloadSink>,
    capture: DomCaptureEngine,
    pdf: PaginatedPdfAssembler,
    workbook: TabularWorkbookBuilder,
    csv: CsvSerializer,
    printer: PrintWindowAdapter,
}

impl ReportExporter {
    /// Exporter with the bundled backends: block rasterizer, download
    /// directory sink and spool print host.
    pub fn new(config: ExportConfig) -> Result<Self> {
        config.validate()?;
        let logger = ExportLogger::new(&config.log);

        let capture = DomCaptureEngine::new(config.capture.clone(), Arc::new(BlockRasterizer::default()))
            .with_logger(logger.clone());
        let pdf = PaginatedPdfAssembler::new(config.page)
            .with_content_sample(config.capture.content_sample_px)
            .with_logger(logger.clone());
        let printer = PrintWindowAdapter::new(
            Arc::new(SpoolPrintHost::new(std::env::temp_dir().join(PRINT_SPOOL_DIR))),
            config.print.clone(),
        )
        .with_logger(logger.clone());

        Ok(Self {
            sink: Arc::new(DirectorySink::new(config.output.resolve_directory())),
            csv: CsvSerializer::new(config.currency.clone()),
            workbook: TabularWorkbookBuilder::new(),
            capture,
            pdf,
            printer,
            logger,
            config,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn DownloadSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.capture = self.capture.with_rasterizer(rasterizer);
        self
    }

    pub fn with_image_loader(mut self, images: Arc<dyn ImageLoader>) -> Self {
        self.capture = self.capture.with_image_loader(images);
        self
    }

    pub fn with_print_host(mut self, host: Arc<dyn PrintHost>) -> Self {
        self.printer = PrintWindowAdapter::new(host, self.config.print.clone())
            .with_logger(self.logger.clone());
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn export_workbook(&self, spec: &WorkbookSpec, filename: &str) -> Result<ExportOutcome> {
        let export_id = self.start(ExportFormat::Xlsx, filename);
        let result = self
            .workbook
            .build(spec)
            .and_then(|bytes| self.deliver(export_id, ExportFormat::Xlsx, filename, bytes));
        self.finish(export_id, ExportFormat::Xlsx, result)
    }

    /// Standard four-sheet workbook for a dataset
    pub fn export_dataset_workbook(&self, dataset: &ReportDataset, filename: &str) -> Result<ExportOutcome> {
        self.check_allocation(dataset);
        let spec = WorkbookSpec::from_dataset(dataset, &self.config.currency, Local::now());
        self.export_workbook(&spec, filename)
    }

    pub fn export_csv(&self, dataset: &ReportDataset, filename: &str) -> Result<ExportOutcome> {
        let export_id = self.start(ExportFormat::Csv, filename);
        self.check_allocation(dataset);
        let result = self
            .csv
            .serialize(dataset)
            .and_then(|bytes| self.deliver(export_id, ExportFormat::Csv, filename, bytes));
        self.finish(export_id, ExportFormat::Csv, result)
    }

    pub async fn export_pdf(
        &self,
        document: &Document,
        element_id: &str,
        filename: &str,
        options: &PdfOptions,
    ) -> Result<ExportOutcome> {
        let export_id = self.start(ExportFormat::Pdf, filename);
        let result = self.render_pdf(export_id, document, element_id, filename, options).await;
        self.finish(export_id, ExportFormat::Pdf, result)
    }

    async fn render_pdf(
        &self,
        export_id: Uuid,
        document: &Document,
        element_id: &str,
        filename: &str,
        options: &PdfOptions,
    ) -> Result<ExportOutcome> {
        let captured = self
            .capture
            .capture(document, element_id, &options.annotations)
            .await?;
        let output = self.pdf.assemble(&captured.bitmap, options)?;

        let mut outcome = self.deliver(export_id, ExportFormat::Pdf, filename, output.bytes)?;
        outcome.pages = Some(output.page_count);
        outcome.strategy = Some(captured.strategy);
        Ok(outcome)
    }

    pub async fn print(&self, document: &Document, element_id: &str, title: &str) -> Result<PrintOutcome> {
        let export_id = Uuid::new_v4();
        self.logger.info(
            "Print started",
            Some(&json!({ "exportId": export_id, "elementId": element_id })),
        );
        let result = self.printer.print(document, element_id, title).await;
        match &result {
            Ok(outcome) => self.logger.info(
                "Print finished",
                Some(&json!({ "exportId": export_id, "loadEventSeen": outcome.load_event_seen })),
            ),
            Err(e) => self.log_failure(export_id, "print", e),
        }
        result
    }

    fn start(&self, format: ExportFormat, filename: &str) -> Uuid {
        let export_id = Uuid::new_v4();
        self.logger.info(
            "Export started",
            Some(&json!({ "exportId": export_id, "format": format, "filename": filename })),
        );
        export_id
    }

    fn deliver(&self, export_id: Uuid, format: ExportFormat, filename: &str, bytes: Vec<u8>) -> Result<ExportOutcome> {
        let size_bytes = bytes.len();
        let download = Download::new(filename, format.extension(), format.mime(), bytes);
        let path = self.sink.deliver(&download)?;
        Ok(ExportOutcome {
            export_id,
            format,
            path,
            size_bytes,
            pages: None,
            strategy: None,
        })
    }

    fn finish(&self, export_id: Uuid, format: ExportFormat, result: Result<ExportOutcome>) -> Result<ExportOutcome> {
        match &result {
            Ok(outcome) => self.logger.info(
                "Export finished",
                Some(&json!({
                    "exportId": export_id,
                    "format": format,
                    "path": outcome.path.display().to_string(),
                    "sizeBytes": outcome.size_bytes,
                    "pages": outcome.pages,
                    "strategy": outcome.strategy,
                })),
            ),
            Err(e) => self.log_failure(export_id, format.extension(), e),
        }
        result
    }

    fn log_failure(&self, export_id: Uuid, operation: &str, error: &ExportError) {
        self.logger.error(
            "Export failed",
            Some(&json!({
                "exportId": export_id,
                "operation": operation,
                "error": error.to_string(),
                "userMessage": error.user_message(),
            })),
        );
    }

    fn check_allocation(&self, dataset: &ReportDataset) {
        let drift = dataset.allocation_drift();
        if drift.abs() > 0.01 {
            self.logger.warn(
                "Allocation percentages do not sum to 100",
                Some(&json!({ "drift": drift })),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RasterOptions;
    use crate::dom::DomElement;
    use crate::download::MemorySink;
    use crate::error::{CaptureError, ValidationError};
    use crate::models::fixtures::sample_dataset;
    use crate::overlay::Annotations;
    use crate::raster::RasterBitmap;
    use async_trait::async_trait;

    const REPORT: &str = r#"<main>
        <div id="report">
            <h1>Patrimoine</h1>
            <p>Immobilier : 100 000 EUR</p>
            <p>Comptes : 25 000 EUR</p>
        </div>
    </main>"#;

    fn exporter(sink: &Arc<MemorySink>) -> ReportExporter {
        ReportExporter::new(ExportConfig::default())
            .unwrap()
            .with_sink(sink.clone())
    }

    #[test]
    fn test_csv_export_delivers() {
        let sink = Arc::new(MemorySink::new());
        let outcome = exporter(&sink)
            .export_csv(&sample_dataset(), "patrimoine")
            .unwrap();
        assert_eq!(outcome.format, ExportFormat::Csv);
        assert_eq!(outcome.path, PathBuf::from("patrimoine.csv"));

        let deliveries = sink.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].mime, "text/csv;charset=utf-8;");
        assert_eq!(deliveries[0].bytes.len(), outcome.size_bytes);
    }

    #[test]
    fn test_failed_export_delivers_nothing() {
        let sink = Arc::new(MemorySink::new());
        let mut dataset = sample_dataset();
        dataset.assets.clear();
        let err = exporter(&sink).export_csv(&dataset, "vide").unwrap_err();
        assert!(matches!(err, ExportError::Validation(ValidationError::EmptyDataset)));
        assert!(sink.deliveries().is_empty());
    }

    #[test]
    fn test_dataset_workbook_export() {
        let sink = Arc::new(MemorySink::new());
        let outcome = exporter(&sink)
            .export_dataset_workbook(&sample_dataset(), "rapport 2024")
            .unwrap();
        assert_eq!(outcome.path, PathBuf::from("rapport_2024.xlsx"));
        assert_eq!(sink.deliveries()[0].mime, XLSX_MIME);
        assert!(sink.deliveries()[0].bytes.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn test_pdf_export_end_to_end() {
        let sink = Arc::new(MemorySink::new());
        let document = Document::from_html(REPORT, 900);
        let options = PdfOptions {
            annotations: Annotations::default().title("Bilan").entity_name("Famille Martin"),
            ..PdfOptions::default()
        };
        let outcome = exporter(&sink)
            .export_pdf(&document, "report", "bilan", &options)
            .await
            .unwrap();
        assert_eq!(outcome.strategy, Some("direct"));
        assert_eq!(outcome.pages, Some(2));
        assert_eq!(sink.deliveries()[0].mime, PDF_MIME);
        assert!(sink.deliveries()[0].bytes.starts_with(b"%PDF"));
    }

    struct BrokenRasterizer;

    #[async_trait]
    impl Rasterizer for BrokenRasterizer {
        async fn rasterize(&self, _el: &DomElement, _o: &RasterOptions) -> anyhow::Result<RasterBitmap> {
            anyhow::bail!("no canvas")
        }
    }

    #[tokio::test]
    async fn test_pdf_capture_failure() {
        let sink = Arc::new(MemorySink::new());
        let document = Document::from_html(REPORT, 900);
        let err = exporter(&sink)
            .with_rasterizer(Arc::new(BrokenRasterizer))
            .export_pdf(&document, "report", "bilan", &PdfOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Capture(CaptureError::AllStrategiesFailed { .. })));
        assert_eq!(err.user_message(), "Impossible de capturer le contenu");
        assert!(sink.deliveries().is_empty());
        assert_eq!(document.offscreen_count(), 0);
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ImageLoader for CountingLoader {
        async fn load(&self, _src: &str) -> anyhow::Result<()> {
            self.loads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rasterizer_swap_keeps_image_loader() {
        let sink = Arc::new(MemorySink::new());
        let document = Document::from_html(
            r#"<div id="report"><p>Portefeuille</p><img src="logo.png"></div>"#,
            900,
        );
        let loader = Arc::new(CountingLoader::default());
        exporter(&sink)
            .with_image_loader(loader.clone())
            .with_rasterizer(Arc::new(BlockRasterizer::default()))
            .export_pdf(&document, "report", "bilan", &PdfOptions::default())
            .await
            .unwrap();
        assert_eq!(loader.loads.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_print_through_spool() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let document = Document::from_html(REPORT, 900);
        let exporter = exporter(&sink).with_print_host(Arc::new(SpoolPrintHost::new(dir.path())));

        exporter.print(&document, "report", "Bilan").await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let err = exporter.print(&document, "absent", "Bilan").await.unwrap_err();
        assert_eq!(err.user_message(), "Élément introuvable. Veuillez rafraîchir la page.");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ExportConfig::default();
        config.page.margin_mm = 200.0;
        assert!(matches!(ReportExporter::new(config), Err(ExportError::Config(_))));
    }
}
