//! The three capture strategies, tried in order until one yields pixels

use super::images::wait_for_images;
use super::{CaptureContext, RasterOptions};
use crate::dom::style::Rgba;
use crate::dom::{Document, DomElement};
use crate::error::StrategyFailure;
use crate::overlay::{OverlayError, OverlayReport, PrintStyleOverlay};
use crate::raster::RasterBitmap;
use crate::render::layout::assign_boxes;
use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

#[async_trait]
pub trait CaptureStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn capture(&self, ctx: &CaptureContext<'_>) -> Result<RasterBitmap, StrategyFailure>;
}

/// Rasterize a clone in place at its own width, minimal styles only
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectStrategy;

/// Mount a print-conditioned clone off-screen at a fixed width and rasterize that
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerStrategy;

/// Last resort: force everything visible, black on white, scale 1, CORS off
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleStrategy;

pub fn default_strategies() -> Vec<Box<dyn CaptureStrategy>> {
    vec![
        Box::new(DirectStrategy),
        Box::new(ContainerStrategy),
        Box::new(SimpleStrategy),
    ]
}

#[async_trait]
impl CaptureStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn capture(&self, ctx: &CaptureContext<'_>) -> Result<RasterBitmap, StrategyFailure> {
        let mut clone = ctx.target.clone();
        apply_overlay(ctx, self.name(), PrintStyleOverlay::new().apply_minimal(&mut clone, ctx.annotations))?;
        wait_for_images(&clone, ctx.images, ctx.config.image_timeout(), ctx.logger).await;

        let options = RasterOptions {
            scale: ctx.config.direct_scale,
            background: Some(Rgba::WHITE),
            ..RasterOptions::default()
        };
        rasterize_checked(ctx, self.name(), &clone, &options).await
    }
}

#[async_trait]
impl CaptureStrategy for ContainerStrategy {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn capture(&self, ctx: &CaptureContext<'_>) -> Result<RasterBitmap, StrategyFailure> {
        let width = ctx.config.container_width_px;

        let mut clone = ctx.target.clone();
        clone.clear_layout();
        apply_overlay(ctx, self.name(), PrintStyleOverlay::new().apply(&mut clone, ctx.annotations))?;

        let mut container = DomElement::new("div")
            .with_style(format!(
                "position: absolute; left: -9999px; top: 0; width: {}px; background: #ffffff; padding: 20px",
                width
            ))
            .with_child(clone);
        assign_boxes(&mut container, width);

        let mounted = OffscreenContainer::mount(ctx.document, container);
        let element = mounted
            .element()
            .ok_or_else(|| failure(ctx, self.name(), "off-screen container vanished before capture", None))?;
        wait_for_images(&element, ctx.images, ctx.config.image_timeout(), ctx.logger).await;

        let options = RasterOptions {
            scale: ctx.config.container_scale,
            background: Some(Rgba::WHITE),
            window_width: Some(width),
            ..RasterOptions::default()
        };
        rasterize_checked(ctx, self.name(), &element, &options).await
        // `mounted` drops here on every path
    }
}

#[async_trait]
impl CaptureStrategy for SimpleStrategy {
    fn name(&self) -> &'static str {
        "simple"
    }

    async fn capture(&self, ctx: &CaptureContext<'_>) -> Result<RasterBitmap, StrategyFailure> {
        let mut clone = ctx.target.clone();
        apply_overlay(ctx, self.name(), PrintStyleOverlay::new().apply_forced_visibility(&mut clone))?;

        let width = ctx.target.offset_size().width;
        let options = RasterOptions {
            scale: ctx.config.simple_scale,
            background: Some(Rgba::WHITE),
            use_cors: false,
            allow_taint: true,
            window_width: (width > 0).then_some(width),
        };
        rasterize_checked(ctx, self.name(), &clone, &options).await
    }
}

/// Off-screen mount that is detached from the document when dropped,
/// whether the capture succeeded, failed or panicked.
pub struct OffscreenContainer<'d> {
    document: &'d Document,
    id: Uuid,
}

impl<'d> OffscreenContainer<'d> {
    pub fn mount(document: &'d Document, element: DomElement) -> Self {
        let id = document.attach_offscreen(element);
        Self { document, id }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The element as currently attached
    pub fn element(&self) -> Option<DomElement> {
        self.document.offscreen_element(self.id)
    }
}

impl Drop for OffscreenContainer<'_> {
    fn drop(&mut self) {
        if self.document.detach_offscreen(self.id).is_none() {
            log::warn!("Off-screen container {} was already detached", self.id);
        }
    }
}

/// A clone that cannot take the styles ends this attempt; the runner moves on
fn apply_overlay(
    ctx: &CaptureContext<'_>,
    strategy: &'static str,
    result: Result<OverlayReport, OverlayError>,
) -> Result<(), StrategyFailure> {
    let report = result.map_err(|e| failure(ctx, strategy, format!("style injection failed: {}", e), None))?;
    ctx.logger.debug(
        "Print styles applied",
        Some(&json!({
            "strategy": strategy,
            "stripped": report.stripped,
            "headerBlocks": report.header_blocks,
            "alreadyApplied": report.already_applied,
        })),
    );
    Ok(())
}

fn failure(
    ctx: &CaptureContext<'_>,
    strategy: &'static str,
    reason: impl Into<String>,
    observed: Option<(u32, u32)>,
) -> StrategyFailure {
    StrategyFailure {
        strategy,
        reason: reason.into(),
        observed,
        text_length: ctx.target.text_length(),
    }
}

async fn rasterize_checked(
    ctx: &CaptureContext<'_>,
    strategy: &'static str,
    element: &DomElement,
    options: &RasterOptions,
) -> Result<RasterBitmap, StrategyFailure> {
    let bitmap = ctx
        .rasterizer
        .rasterize(element, options)
        .await
        .map_err(|e| failure(ctx, strategy, format!("rasterizer error: {:#}", e), None))?;

    let observed = Some((bitmap.width(), bitmap.height()));
    if !bitmap.has_content(ctx.config.content_sample_px) {
        return Err(failure(ctx, strategy, "bitmap has no visible pixels", observed));
    }
    Ok(bitmap)
}
