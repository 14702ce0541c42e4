//! Report export pipeline for wealth management dashboards.
//!
//! Four ways out of a report: an XLSX workbook and a CSV file built from the
//! dataset, a paginated PDF captured from the rendered report region, and a
//! print job sent through a separate window.

pub mod capture;
pub mod config;
pub mod csv;
pub mod dom;
pub mod download;
pub mod error;
pub mod export;
pub mod logging;
pub mod models;
pub mod overlay;
pub mod pdf;
pub mod print;
pub mod raster;
pub mod render;
pub mod workbook;

pub use capture::{CaptureOutcome, DomCaptureEngine, ImageLoader, RasterOptions, Rasterizer};
pub use config::{ExportConfig, PageGeometry};
pub use csv::CsvSerializer;
pub use dom::{Document, DomElement};
pub use download::{DirectorySink, Download, DownloadSink, MemorySink};
pub use error::{CaptureError, ExportError, PrintError, Result, ValidationError};
pub use export::{ExportFormat, ExportOutcome, ReportExporter};
pub use logging::{ExportLogger, LogConfig};
pub use models::{ReportDataset, SheetSpec, WorkbookSpec};
pub use overlay::{Annotations, PrintStyleOverlay};
pub use pdf::{PaginatedPdfAssembler, PaginationMode, PdfOptions, PdfOutput};
pub use print::{PrintHost, PrintWindow, PrintWindowAdapter, SpoolPrintHost};
pub use raster::RasterBitmap;
pub use render::BlockRasterizer;
pub use workbook::TabularWorkbookBuilder;
