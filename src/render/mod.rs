//! Bundled rasterizer
//!
//! `BlockRasterizer` paints the block layout of an element: backgrounds,
//! one bar per text line and placeholders for images. It needs no browser
//! and no fonts, which makes capture deterministic.

pub mod layout;

use crate::capture::{RasterOptions, Rasterizer};
use crate::dom::style::Rgba;
use crate::dom::DomElement;
use crate::raster::RasterBitmap;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::RgbaImage;
use layout::{Fragment, LayoutBox, LayoutEngine, Rect};

#[derive(Debug, Clone)]
pub struct BlockRasterizer {
    /// Used when neither the element nor the options give a width
    pub default_width: u32,
}

impl Default for BlockRasterizer {
    fn default() -> Self {
        Self { default_width: 800 }
    }
}

impl BlockRasterizer {
    pub fn render(&self, element: &DomElement, options: &RasterOptions) -> Result<RasterBitmap> {
        let width = element
            .layout
            .map(|b| b.width)
            .filter(|w| *w > 0)
            .or(options.window_width)
            .unwrap_or(self.default_width);

        let engine = LayoutEngine::for_tree(element);
        let tree = engine.layout(element, width as f32);

        let scale = options.scale;
        let px_width = scaled(tree.rect.width, scale);
        let px_height = scaled(tree.rect.height, scale);
        if px_width == 0 || px_height == 0 {
            return Err(anyhow!(
                "element rendered with zero size ({}x{})",
                px_width,
                px_height
            ));
        }

        let background = options.background.unwrap_or(Rgba::TRANSPARENT);
        let mut canvas = RgbaImage::from_pixel(
            px_width,
            px_height,
            image::Rgba([background.r, background.g, background.b, background.a]),
        );
        paint_box(&mut canvas, &tree, scale);

        RasterBitmap::new(canvas).map_err(|e| anyhow!(e))
    }
}

#[async_trait]
impl Rasterizer for BlockRasterizer {
    async fn rasterize(&self, element: &DomElement, options: &RasterOptions) -> Result<RasterBitmap> {
        self.render(element, options)
    }
}

/// Device pixels for `css_px`, ignoring float noise in the last digits
fn scaled(css_px: f32, scale: f32) -> u32 {
    (css_px * scale - 0.01).ceil().max(0.0) as u32
}

fn paint_box(canvas: &mut RgbaImage, layout: &LayoutBox, scale: f32) {
    if let Some(background) = layout.background {
        fill_rect(canvas, &layout.rect, background, scale);
    }
    for fragment in &layout.fragments {
        match fragment {
            Fragment::TextLine { rect, color } | Fragment::Replaced { rect, color } => {
                fill_rect(canvas, rect, *color, scale)
            }
        }
    }
    for child in &layout.children {
        paint_box(canvas, child, scale);
    }
}

fn fill_rect(canvas: &mut RgbaImage, rect: &Rect, color: Rgba, scale: f32) {
    if color.is_transparent() {
        return;
    }
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(canvas.width());
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(canvas.height());
    let x0 = clamp_x((rect.x * scale).floor());
    let x1 = clamp_x(((rect.x + rect.width) * scale).ceil());
    let y0 = clamp_y((rect.y * scale).floor());
    let y1 = clamp_y(((rect.y + rect.height) * scale).ceil());

    let alpha = color.a as u32;
    for y in y0..y1 {
        for x in x0..x1 {
            let px = canvas.get_pixel_mut(x, y);
            if alpha == 255 {
                *px = image::Rgba([color.r, color.g, color.b, 255]);
                continue;
            }
            // Source-over compositing
            let [r, g, b, a] = px.0;
            let blend = |src: u8, dst: u8| ((src as u32 * alpha + dst as u32 * (255 - alpha)) / 255) as u8;
            let out_a = alpha + a as u32 * (255 - alpha) / 255;
            *px = image::Rgba([blend(color.r, r), blend(color.g, g), blend(color.b, b), out_a as u8]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(scale: f32, background: Option<Rgba>) -> RasterOptions {
        RasterOptions {
            scale,
            background,
            ..RasterOptions::default()
        }
    }

    #[test]
    fn test_scale_applies_to_bitmap() {
        let el = DomElement::new("div").with_text("Patrimoine").with_layout(100, 0);
        let bitmap = BlockRasterizer::default()
            .render(&el, &options(2.0, Some(Rgba::WHITE)))
            .unwrap();
        assert_eq!(bitmap.width(), 200);
        assert_eq!(bitmap.height(), (16.0 * 1.4 * 2.0f32).ceil() as u32);
        assert!(bitmap.has_content(100));
    }

    #[test]
    fn test_transparent_background_without_ink() {
        let el = DomElement::new("div")
            .with_style("height: 50px")
            .with_child(DomElement::new("p").with_class("invisible").with_text("x"));
        let bitmap = BlockRasterizer::default().render(&el, &options(1.0, None)).unwrap();
        assert!(!bitmap.has_content(100));
    }

    #[test]
    fn test_text_is_painted() {
        let el = DomElement::new("div").with_text("Total");
        let bitmap = BlockRasterizer::default().render(&el, &options(1.0, None)).unwrap();
        let painted = bitmap.image().pixels().filter(|p| p.0[3] == 255).count();
        assert!(painted > 0);
    }

    #[test]
    fn test_display_none_root_fails() {
        let el = DomElement::new("div").with_style("display: none").with_text("x");
        assert!(BlockRasterizer::default().render(&el, &options(1.0, None)).is_err());
    }
}
