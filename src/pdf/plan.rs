//! Page planning for captured bitmaps
//!
//! Pure geometry: how many pages, which source rows land on each page and
//! where they are drawn. All distances are millimetres from the top-left of
//! the page; the renderer flips them into PDF coordinates.

use crate::config::PageGeometry;
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Slack for float comparisons on page boundaries
const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaginationMode {
    /// Width-fit, sliced into page-height bands
    #[default]
    Paginate,
    /// Whole bitmap shrunk onto a single page and centered
    FitToPage,
}

/// One source band drawn on one page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// First source row of the band
    pub source_y: u32,
    pub source_height: u32,
    pub x_mm: f64,
    pub y_mm: f64,
    pub width_mm: f64,
    pub height_mm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    pub placements: Vec<Placement>,
    /// Source pixels per full page; `None` when nothing is sliced
    pub px_per_page: Option<f64>,
}

impl PagePlan {
    pub fn page_count(&self) -> usize {
        self.placements.len()
    }
}

pub fn plan_pages(
    source_width: u32,
    source_height: u32,
    geometry: &PageGeometry,
    mode: PaginationMode,
) -> Result<PagePlan, ValidationError> {
    if source_width == 0 || source_height == 0 {
        return Err(ValidationError::EmptyBitmap {
            width: source_width,
            height: source_height,
        });
    }

    let src_w = source_width as f64;
    let src_h = source_height as f64;
    let content_w = geometry.content_width() as f64;
    let content_h = geometry.content_height() as f64;
    let margin = geometry.margin_mm as f64;

    if mode == PaginationMode::FitToPage {
        let scale = (content_w / src_w).min(content_h / src_h);
        let (w, h) = (src_w * scale, src_h * scale);
        return Ok(PagePlan {
            placements: vec![Placement {
                source_y: 0,
                source_height,
                x_mm: margin + (content_w - w) / 2.0,
                y_mm: margin + (content_h - h) / 2.0,
                width_mm: w,
                height_mm: h,
            }],
            px_per_page: None,
        });
    }

    // Height of the whole bitmap once scaled to the content width
    let image_h = src_h * content_w / src_w;
    if image_h <= content_h + EPSILON {
        return Ok(PagePlan {
            placements: vec![Placement {
                source_y: 0,
                source_height,
                x_mm: margin,
                y_mm: margin,
                width_mm: content_w,
                height_mm: image_h,
            }],
            px_per_page: None,
        });
    }

    let px_per_page = content_h * src_w / content_w;
    let pages = ((src_h / px_per_page) - EPSILON).ceil().max(1.0) as u32;

    let boundary = |i: u32| -> u32 {
        if i >= pages {
            source_height
        } else {
            ((i as f64 * px_per_page) + EPSILON).floor() as u32
        }
    };

    let placements = (0..pages)
        .map(|i| {
            let top = boundary(i);
            let band = boundary(i + 1) - top;
            Placement {
                source_y: top,
                source_height: band,
                x_mm: margin,
                y_mm: margin,
                width_mm: content_w,
                height_mm: band as f64 * content_w / src_w,
            }
        })
        .filter(|p| p.source_height > 0)
        .collect();

    Ok(PagePlan {
        placements,
        px_per_page: Some(px_per_page),
    })
}
