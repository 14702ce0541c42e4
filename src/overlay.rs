//! Print conditioning for cloned report trees
//!
//! Everything here takes `&mut DomElement`, so it can only ever run on a
//! clone: the live tree is reachable through shared references only.

use crate::dom::DomElement;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attribute set on injected `<style>` elements and header blocks
pub const OVERLAY_ATTR: &str = "data-print-overlay";
/// Attribute marking the root of a conditioned clone
pub const PRINT_ROOT_ATTR: &str = "data-print-root";
/// Attribute marking the root of a capture clone
pub const CAPTURE_ROOT_ATTR: &str = "data-capture-root";

/// Active or embedded content that never belongs in an export
const STRIPPED_TAGS: &[&str] = &["script", "iframe", "object", "embed", "noscript"];

/// Full print stylesheet used by the container strategy
pub const PRINT_STYLESHEET: &str = r#"
[data-print-root] { background: #ffffff !important; color: #111827 !important; font-size: 14px !important; font-family: Arial, Helvetica, sans-serif !important; padding: 24px !important }
button, [role="button"], .cursor-pointer, .no-print, .print-hidden { display: none !important }
[data-print-root] * { position: static !important; overflow: visible !important; box-shadow: none !important; text-shadow: none !important; border-radius: 0 !important; transform: none !important; transition: none !important; animation: none !important }
.grid, .flex, .inline-flex, .inline-grid { display: block !important }
h1 { font-size: 28px !important; font-weight: bold !important; text-align: center !important; border-bottom: 2px solid #333333 !important; padding-bottom: 8px !important; margin-bottom: 16px !important }
h2 { font-size: 22px !important; font-weight: bold !important; margin-bottom: 12px !important }
h3 { font-size: 18px !important; font-weight: bold !important; margin-bottom: 10px !important }
p, li, td, th { font-size: 14px !important; line-height: 1.5 !important }
small, .text-sm { font-size: 13px !important }
.text-xs { font-size: 12px !important }
table { width: 100% !important; border-collapse: collapse !important; margin-bottom: 16px !important }
th, td { border: 1px solid #d1d5db !important; padding: 6px 8px !important; text-align: left !important }
th { background: #f3f4f6 !important; font-weight: bold !important }
svg, canvas, .recharts-wrapper, .recharts-responsive-container, .chart-container { display: block !important; visibility: visible !important; height: 300px !important; min-height: 300px !important; background: #f9fafb !important }
.export-title { font-size: 28px !important; text-align: center !important; margin-bottom: 8px !important }
.export-entity { font-size: 16px !important; color: #4b5563 !important; text-align: center !important; margin-bottom: 4px !important }
.export-subtitle { font-size: 13px !important; color: #6b7280 !important; text-align: center !important; margin-bottom: 16px !important }
"#;

/// Injected by the direct strategy: make the captured root itself visible
pub const MINIMAL_CAPTURE_CSS: &str = r#"
[data-capture-root] { display: block !important; visibility: visible !important; opacity: 1 !important; background: #ffffff !important }
svg, canvas { visibility: visible !important }
.export-title { font-size: 24px !important; text-align: center !important; margin-bottom: 8px !important }
.export-entity { font-size: 16px !important; color: #4b5563 !important; text-align: center !important }
.export-subtitle { font-size: 13px !important; color: #6b7280 !important; text-align: center !important; margin-bottom: 12px !important }
"#;

/// Blunt last-resort stylesheet for the simple strategy
pub const FORCED_VISIBILITY_CSS: &str = r#"
* { visibility: visible !important; opacity: 1 !important; color: #000000 !important }
.hidden, .invisible { display: block !important; visibility: visible !important }
[data-capture-root] { background: #ffffff !important }
"#;

/// Stylesheet embedded in the print window document
pub const PRINT_WINDOW_CSS: &str = r#"
@page { size: A4 portrait; margin: 10mm }
body { font-family: Arial, Helvetica, sans-serif; font-size: 14px; color: #111827; background: #ffffff; margin: 0; padding: 16px }
button, [role="button"], .cursor-pointer, .no-print { display: none !important }
* { box-shadow: none !important; border-radius: 0 !important; transform: none !important; animation: none !important; transition: none !important }
.grid, .flex { display: block !important }
.fixed, .absolute, .sticky { position: static !important }
h1 { font-size: 28px; font-weight: bold; text-align: center; border-bottom: 2px solid #333333; padding-bottom: 8px }
h2 { font-size: 22px; font-weight: bold }
h3 { font-size: 18px; font-weight: bold }
table { width: 100%; border-collapse: collapse }
th, td { border: 1px solid #d1d5db; padding: 6px 8px; text-align: left }
th { background: #f3f4f6 }
svg, canvas { max-width: 100% }
"#;

/// Optional header metadata shown above the captured content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotations {
    pub title: Option<String>,
    pub entity_name: Option<String>,
    pub subtitle: Option<String>,
}

impl Annotations {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn entity_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    fn present(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// A PDF title page is emitted when either a title or an entity name is set
    pub fn wants_title_page(&self) -> bool {
        Self::present(&self.title).is_some() || Self::present(&self.entity_name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.wants_title_page() && Self::present(&self.subtitle).is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OverlayError {
    #[error("<{0}> cannot host injected styles")]
    CannotHostStyles(String),
}

/// What an overlay pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayReport {
    pub stripped: usize,
    pub header_blocks: usize,
    pub already_applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverlayMode {
    Print,
    Minimal,
    ForcedVisibility,
}

impl OverlayMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Minimal => "minimal",
            Self::ForcedVisibility => "forced-visibility",
        }
    }

    fn stylesheet(&self) -> &'static str {
        match self {
            Self::Print => PRINT_STYLESHEET,
            Self::Minimal => MINIMAL_CAPTURE_CSS,
            Self::ForcedVisibility => FORCED_VISIBILITY_CSS,
        }
    }

    fn root_attr(&self) -> &'static str {
        match self {
            Self::Print => PRINT_ROOT_ATTR,
            Self::Minimal | Self::ForcedVisibility => CAPTURE_ROOT_ATTR,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrintStyleOverlay;

impl PrintStyleOverlay {
    pub fn new() -> Self {
        Self
    }

    /// Full print conditioning: strip active content, inject the print
    /// stylesheet and prepend header blocks.
    pub fn apply(
        &self,
        root: &mut DomElement,
        annotations: &Annotations,
    ) -> Result<OverlayReport, OverlayError> {
        self.inject(root, OverlayMode::Print, Some(annotations))
    }

    /// Light conditioning for direct capture: scripts out, root forced visible
    pub fn apply_minimal(
        &self,
        root: &mut DomElement,
        annotations: &Annotations,
    ) -> Result<OverlayReport, OverlayError> {
        self.inject(root, OverlayMode::Minimal, Some(annotations))
    }

    /// Hidden/invisible utility classes forced visible, black on white
    pub fn apply_forced_visibility(&self, root: &mut DomElement) -> Result<OverlayReport, OverlayError> {
        self.inject(root, OverlayMode::ForcedVisibility, None)
    }

    /// Remove scripts, frames and embedded objects; returns how many went
    pub fn strip_active_content(root: &mut DomElement) -> usize {
        root.remove_descendants(&|e| STRIPPED_TAGS.contains(&e.tag.as_str()))
    }

    fn inject(
        &self,
        root: &mut DomElement,
        mode: OverlayMode,
        annotations: Option<&Annotations>,
    ) -> Result<OverlayReport, OverlayError> {
        if crate::dom::is_void_tag(&root.tag) {
            return Err(OverlayError::CannotHostStyles(root.tag.clone()));
        }

        let stripped = Self::strip_active_content(root);
        if has_overlay(root, mode) {
            return Ok(OverlayReport {
                stripped,
                header_blocks: 0,
                already_applied: true,
            });
        }

        root.set_attr(mode.root_attr(), "true");

        let headers = annotations.map(header_blocks).unwrap_or_default();
        let header_blocks = headers.len();
        if !headers.is_empty() {
            let mut header = DomElement::new("header")
                .with_class("export-header")
                .with_attr(OVERLAY_ATTR, mode.as_str());
            for block in headers {
                header = header.with_child(block);
            }
            root.prepend_child(header);
        }

        let style = DomElement::new("style")
            .with_attr(OVERLAY_ATTR, mode.as_str())
            .with_text(mode.stylesheet());
        root.prepend_child(style);

        Ok(OverlayReport {
            stripped,
            header_blocks,
            already_applied: false,
        })
    }
}

fn has_overlay(root: &DomElement, mode: OverlayMode) -> bool {
    root.element_children()
        .any(|c| c.tag == "style" && c.attr(OVERLAY_ATTR) == Some(mode.as_str()))
}

/// Title, entity badge and subtitle, in that order. Text nodes are escaped on
/// serialization, so metadata can never inject markup.
fn header_blocks(annotations: &Annotations) -> Vec<DomElement> {
    let mut blocks = Vec::new();
    if let Some(title) = Annotations::present(&annotations.title) {
        blocks.push(
            DomElement::new("h1")
                .with_class("export-title")
                .with_style("text-align: center")
                .with_text(title),
        );
    }
    if let Some(entity) = Annotations::present(&annotations.entity_name) {
        blocks.push(
            DomElement::new("div")
                .with_class("export-entity")
                .with_style("text-align: center; font-weight: bold")
                .with_text(entity),
        );
    }
    if let Some(subtitle) = Annotations::present(&annotations.subtitle) {
        blocks.push(
            DomElement::new("p")
                .with_class("export-subtitle")
                .with_style("text-align: center")
                .with_text(subtitle),
        );
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::style::Stylesheet;

    fn report() -> DomElement {
        DomElement::parse_fragment(
            r#"<div id="report" class="grid shadow-lg">
                <script>track()</script>
                <h2>Répartition</h2>
                <button class="btn">Exporter</button>
                <iframe src="https://example.com"></iframe>
                <div class="recharts-wrapper"><svg></svg></div>
            </div>"#,
        )
    }

    #[test]
    fn test_apply_strips_and_injects() {
        let mut clone = report();
        let result = PrintStyleOverlay::new()
            .apply(&mut clone, &Annotations::default().title("Bilan 2024"))
            .unwrap();
        assert_eq!(result.stripped, 2);
        assert_eq!(result.header_blocks, 1);
        assert!(clone.find_all_by_tag("script").is_empty());
        assert!(clone.find_all_by_tag("iframe").is_empty());
        assert_eq!(clone.attr(PRINT_ROOT_ATTR), Some("true"));

        let first: Vec<_> = clone.element_children().take(2).map(|e| e.tag.as_str()).collect();
        assert_eq!(first, ["style", "header"]);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let overlay = PrintStyleOverlay::new();
        let mut clone = report();
        let annotations = Annotations::default().title("Bilan").subtitle("Exercice 2024");
        overlay.apply(&mut clone, &annotations).unwrap();
        let once = clone.clone();
        let second = overlay.apply(&mut clone, &annotations).unwrap();
        assert!(second.already_applied);
        assert_eq!(clone, once);
    }

    #[test]
    fn test_live_tree_untouched() {
        let live = report();
        let mut clone = live.clone();
        PrintStyleOverlay::new()
            .apply(&mut clone, &Annotations::default())
            .unwrap();
        assert_eq!(live.find_all_by_tag("script").len(), 1);
        assert!(live.attr(PRINT_ROOT_ATTR).is_none());
    }

    #[test]
    fn test_header_text_is_escaped() {
        let mut clone = DomElement::new("div").with_text("x");
        PrintStyleOverlay::new()
            .apply(
                &mut clone,
                &Annotations::default().entity_name("<b>Dupont & Fils</b>"),
            )
            .unwrap();
        let html = clone.outer_html();
        assert!(html.contains("&lt;b&gt;Dupont &amp; Fils&lt;/b&gt;"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn test_void_root_rejected() {
        let mut img = DomElement::new("img");
        assert_eq!(
            PrintStyleOverlay::new().apply_forced_visibility(&mut img),
            Err(OverlayError::CannotHostStyles("img".to_string()))
        );
    }

    #[test]
    fn test_print_stylesheet_rules() {
        let sheet = Stylesheet::parse(PRINT_STYLESHEET);
        let button = DomElement::new("button");
        let chart = DomElement::new("div").with_class("recharts-wrapper");
        let h1 = DomElement::new("h1");
        assert_eq!(sheet.cascaded_value(&button, "display").as_deref(), Some("none"));
        assert_eq!(sheet.cascaded_value(&chart, "height").as_deref(), Some("300px"));
        assert_eq!(sheet.cascaded_value(&h1, "font-size").as_deref(), Some("28px"));
    }

    #[test]
    fn test_forced_visibility_overrides_hidden_class() {
        let sheet = Stylesheet::parse(FORCED_VISIBILITY_CSS);
        let el = DomElement::new("p").with_class("hidden");
        assert_eq!(sheet.cascaded_value(&el, "display").as_deref(), Some("block"));
        assert_eq!(sheet.cascaded_value(&el, "visibility").as_deref(), Some("visible"));
    }

    #[test]
    fn test_title_page_rules() {
        assert!(!Annotations::default().wants_title_page());
        assert!(!Annotations::default().subtitle("s").wants_title_page());
        assert!(Annotations::default().entity_name("SCI").wants_title_page());
        assert!(!Annotations::default().title("   ").wants_title_page());
    }
}
