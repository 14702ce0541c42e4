//! PDF assembly
//!
//! Turns a captured bitmap into an A4 portrait PDF: an optional title page
//! followed by the bitmap, width-fit and sliced into page-height bands.

pub mod plan;

use crate::config::PageGeometry;
use crate::error::{ExportError, Result};
use crate::logging::ExportLogger;
use crate::overlay::Annotations;
use crate::raster::{validate_data_url, RasterBitmap};
use chrono::{DateTime, Local};
use printpdf::image_crate::{DynamicImage, RgbImage};
use printpdf::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub use plan::{plan_pages, PagePlan, PaginationMode, Placement};

const MM_TO_PT: f32 = 2.834645669; // 1mm = 2.834645669 points

/// Average Helvetica advance as a fraction of the font size
const HELVETICA_AVG_ADVANCE: f32 = 0.5;

const CONFIDENTIAL_NOTE: &str = "Document confidentiel - usage strictement personnel";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfOptions {
    #[serde(flatten)]
    pub annotations: Annotations,
    pub mode: PaginationMode,
    /// Timestamp printed on the title page; defaults to now
    #[serde(skip)]
    pub generated_at: Option<DateTime<Local>>,
}

#[derive(Debug, Clone)]
pub struct PdfOutput {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    pub body_pages: usize,
    pub has_title_page: bool,
}

pub struct PaginatedPdfAssembler {
    geometry: PageGeometry,
    content_sample_px: u32,
    logger: ExportLogger,
}

impl PaginatedPdfAssembler {
    pub fn new(geometry: PageGeometry) -> Self {
        Self {
            geometry,
            content_sample_px: 100,
            logger: ExportLogger::default(),
        }
    }

    pub fn with_content_sample(mut self, px: u32) -> Self {
        self.content_sample_px = px;
        self
    }

    pub fn with_logger(mut self, logger: ExportLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    pub fn assemble(&self, bitmap: &RasterBitmap, options: &PdfOptions) -> Result<PdfOutput> {
        // Last line of defense before anything is laid out
        if !bitmap.has_content(self.content_sample_px) {
            return Err(ExportError::Encoding(
                "captured bitmap is fully transparent".to_string(),
            ));
        }
        let data_url = bitmap.to_data_url()?;
        validate_data_url(&data_url)?;

        let plan = plan_pages(bitmap.width(), bitmap.height(), &self.geometry, options.mode)?;
        let has_title_page = options.annotations.wants_title_page();

        self.logger.debug(
            "PDF page plan",
            Some(&json!({
                "sourceWidth": bitmap.width(),
                "sourceHeight": bitmap.height(),
                "pxPerPage": plan.px_per_page,
                "bodyPages": plan.page_count(),
                "titlePage": has_title_page,
                "dataUrlLength": data_url.len(),
            })),
        );

        let doc_title = options
            .annotations
            .title
            .clone()
            .unwrap_or_else(|| "Rapport patrimonial".to_string());
        let (doc, page1, layer1) = create_pdf(&doc_title, &self.geometry);
        let mut first_page = Some((page1, layer1));
        let mut next_layer = |doc: &PdfDocumentReference| -> PdfLayerReference {
            let (page, layer) = first_page.take().unwrap_or_else(|| {
                doc.add_page(
                    Mm(self.geometry.width_mm),
                    Mm(self.geometry.height_mm),
                    "Layer 1",
                )
            });
            doc.get_page(page).get_layer(layer)
        };

        if has_title_page {
            let layer = next_layer(&doc);
            let generated_at = options.generated_at.unwrap_or_else(Local::now);
            self.draw_title_page(&doc, &layer, &options.annotations, generated_at)?;
        }

        for placement in &plan.placements {
            let band = bitmap.crop_band(placement.source_y, placement.source_height)?;
            let layer = next_layer(&doc);
            self.draw_band(&layer, &band, placement)?;
        }

        let bytes = doc
            .save_to_bytes()
            .map_err(|e| ExportError::serialization("pdf", e))?;

        let body_pages = plan.page_count();
        Ok(PdfOutput {
            bytes,
            page_count: body_pages + usize::from(has_title_page),
            body_pages,
            has_title_page,
        })
    }

    fn draw_band(&self, layer: &PdfLayerReference, band: &RasterBitmap, placement: &Placement) -> Result<()> {
        let rgb = band.flatten_onto_white();
        let (w, h) = rgb.dimensions();
        let image = RgbImage::from_raw(w, h, rgb.into_raw())
            .ok_or_else(|| ExportError::Encoding("bitmap band has inconsistent size".to_string()))?;
        let image = Image::from_dynamic_image(&DynamicImage::ImageRgb8(image));

        // Pick the DPI that makes the band exactly `width_mm` wide
        let dpi = (w as f64 * 25.4 / placement.width_mm) as f32;
        let bottom = self.geometry.height_mm as f64 - placement.y_mm - placement.height_mm;
        image.add_to_layer(
            layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(placement.x_mm as f32)),
                translate_y: Some(Mm(bottom as f32)),
                dpi: Some(dpi),
                ..Default::default()
            },
        );
        Ok(())
    }

    fn draw_title_page(
        &self,
        doc: &PdfDocumentReference,
        layer: &PdfLayerReference,
        annotations: &Annotations,
        generated_at: DateTime<Local>,
    ) -> Result<()> {
        let font = get_font(doc)?;
        let font_bold = get_font_bold(doc)?;
        let top = |offset_mm: f32| Mm(self.geometry.height_mm - offset_mm);

        let mut y = 100.0;
        if let Some(title) = non_blank(&annotations.title) {
            layer.set_fill_color(gray(0.0));
            add_centered_text(layer, &font_bold, &self.geometry, top(y), 26.0, title);
            y += 15.0;
        }
        if let Some(entity) = non_blank(&annotations.entity_name) {
            layer.set_fill_color(gray(0.4));
            add_centered_text(layer, &font, &self.geometry, top(y), 16.0, entity);
            y += 12.0;
        }
        if let Some(subtitle) = non_blank(&annotations.subtitle) {
            layer.set_fill_color(gray(0.55));
            add_centered_text(layer, &font, &self.geometry, top(y), 12.0, subtitle);
            y += 10.0;
        }

        layer.set_fill_color(gray(0.4));
        let stamp = format!("Généré le {}", generated_at.format("%d/%m/%Y à %H:%M"));
        add_centered_text(layer, &font, &self.geometry, top(y + 5.0), 10.0, &stamp);

        // Separator rule
        let rule_y = top(y + 15.0);
        let inset = self.geometry.margin_mm + 30.0;
        layer.set_outline_color(gray(0.75));
        layer.set_outline_thickness(0.5);
        layer.add_line(Line {
            points: vec![
                (Point::new(Mm(inset), rule_y), false),
                (Point::new(Mm(self.geometry.width_mm - inset), rule_y), false),
            ],
            is_closed: false,
        });

        // Footer
        layer.set_fill_color(gray(0.55));
        add_centered_text(
            layer,
            &font,
            &self.geometry,
            Mm(self.geometry.margin_mm + 5.0),
            8.0,
            CONFIDENTIAL_NOTE,
        );
        Ok(())
    }
}

/// Create a new PDF document with one empty page
fn create_pdf(title: &str, geometry: &PageGeometry) -> (PdfDocumentReference, PdfPageIndex, PdfLayerIndex) {
    PdfDocument::new(
        title,
        Mm(geometry.width_mm),
        Mm(geometry.height_mm),
        "Layer 1",
    )
}

/// Get a built-in font
fn get_font(doc: &PdfDocumentReference) -> Result<IndirectFontRef> {
    doc.add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ExportError::serialization("pdf", e))
}

fn get_font_bold(doc: &PdfDocumentReference) -> Result<IndirectFontRef> {
    doc.add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ExportError::serialization("pdf", e))
}

/// Add horizontally centered text, width estimated from average glyph advance
fn add_centered_text(
    layer: &PdfLayerReference,
    font: &IndirectFontRef,
    geometry: &PageGeometry,
    y: Mm,
    size: f32,
    text: &str,
) {
    let width_mm = text.chars().count() as f32 * size * HELVETICA_AVG_ADVANCE / MM_TO_PT;
    let x = ((geometry.width_mm - width_mm) / 2.0).max(geometry.margin_mm);
    layer.use_text(text, size, Mm(x), y, font);
}

fn gray(level: f32) -> Color {
    Color::Rgb(Rgb::new(level, level, level, None))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
