//! Block-flow layout
//!
//! Every element is laid out as a block stacked under its previous sibling,
//! which is also what the print stylesheet forces on grid and flex
//! containers. Text is measured with fixed average glyph metrics.

use crate::dom::style::{parse_length, Rgba, Stylesheet};
use crate::dom::{BoxSize, DomElement, DomNode};

const USER_AGENT_CSS: &str = r#"
head, style, script, title, meta, link, template, noscript { display: none }
h1 { font-size: 32px; margin-bottom: 0.5em }
h2 { font-size: 24px; margin-bottom: 0.5em }
h3 { font-size: 18.72px; margin-bottom: 0.5em }
p, ul, ol, table { margin-bottom: 0.5em }
small { font-size: 13px }
svg, canvas { height: 150px }
.hidden { display: none }
.invisible { visibility: hidden }
"#;

/// Average glyph advance as a fraction of the font size
const GLYPH_WIDTH: f32 = 0.5;
const LINE_HEIGHT: f32 = 1.4;
/// Height of the painted text bar as a fraction of the font size
const INK_HEIGHT: f32 = 0.7;

const DEFAULT_IMAGE_WIDTH: f32 = 150.0;
const DEFAULT_IMAGE_HEIGHT: f32 = 100.0;
const IMAGE_PLACEHOLDER: Rgba = Rgba::rgb(0xd1, 0xd5, 0xdb);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// One line of text, drawn as a solid bar
    TextLine { rect: Rect, color: Rgba },
    /// Image or other replaced content
    Replaced { rect: Rect, color: Rgba },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub rect: Rect,
    pub margin_bottom: f32,
    pub background: Option<Rgba>,
    pub fragments: Vec<Fragment>,
    /// One entry per element child, in document order
    pub children: Vec<LayoutBox>,
}

impl LayoutBox {
    fn collapsed(x: f32, y: f32) -> Self {
        Self {
            rect: Rect {
                x,
                y,
                width: 0.0,
                height: 0.0,
            },
            margin_bottom: 0.0,
            background: None,
            fragments: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn size(&self) -> BoxSize {
        BoxSize::new(
            self.rect.width.max(0.0).round() as u32,
            self.rect.height.max(0.0).round() as u32,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ComputedStyle {
    display_none: bool,
    visible: bool,
    color: Rgba,
    background: Option<Rgba>,
    font_size: f32,
    width: Option<f32>,
    height: Option<f32>,
    margin_bottom: f32,
    padding: f32,
}

impl ComputedStyle {
    fn root() -> Self {
        Self {
            display_none: false,
            visible: true,
            color: Rgba::BLACK,
            background: None,
            font_size: 16.0,
            width: None,
            height: None,
            margin_bottom: 0.0,
            padding: 0.0,
        }
    }

    fn compute(el: &DomElement, parent: &ComputedStyle, sheet: &Stylesheet) -> Self {
        let value = |prop: &str| sheet.cascaded_value(el, prop);

        let font_size = value("font-size")
            .and_then(|v| match v.as_str() {
                "small" => Some(13.0),
                "x-small" => Some(10.0),
                "large" => Some(18.0),
                other => parse_length(other, parent.font_size),
            })
            .unwrap_or(parent.font_size);

        let background = value("background-color")
            .or_else(|| value("background"))
            .and_then(|v| {
                Rgba::parse(&v).or_else(|| v.split_whitespace().find_map(Rgba::parse))
            })
            .filter(|c| !c.is_transparent());

        Self {
            display_none: value("display").map_or(false, |v| v == "none"),
            visible: value("visibility")
                .map_or(parent.visible, |v| v != "hidden" && v != "collapse"),
            color: value("color")
                .and_then(|v| Rgba::parse(&v))
                .unwrap_or(parent.color),
            background,
            font_size,
            width: value("width").and_then(|v| parse_length(&v, font_size)),
            height: value("height").and_then(|v| parse_length(&v, font_size)),
            margin_bottom: value("margin-bottom")
                .and_then(|v| parse_length(&v, font_size))
                .unwrap_or(0.0),
            padding: value("padding")
                .and_then(|v| v.split_whitespace().next().and_then(|p| parse_length(p, font_size)))
                .unwrap_or(0.0),
        }
    }
}

pub struct LayoutEngine {
    sheet: Stylesheet,
}

impl LayoutEngine {
    /// User-agent rules followed by every `<style>` element found in `root`
    pub fn for_tree(root: &DomElement) -> Self {
        let mut sheet = Stylesheet::parse(USER_AGENT_CSS);
        for style in root.find_all_by_tag("style") {
            sheet.extend(Stylesheet::parse(&style.inner_html()));
        }
        Self { sheet }
    }

    pub fn layout(&self, root: &DomElement, available_width: f32) -> LayoutBox {
        self.layout_element(root, &ComputedStyle::root(), 0.0, 0.0, available_width)
    }

    fn layout_element(
        &self,
        el: &DomElement,
        parent: &ComputedStyle,
        x: f32,
        y: f32,
        available_width: f32,
    ) -> LayoutBox {
        let style = ComputedStyle::compute(el, parent, &self.sheet);
        if style.display_none {
            return LayoutBox::collapsed(x, y);
        }

        if el.tag == "img" {
            let attr_px = |name: &str| el.attr(name).and_then(|v| v.trim_end_matches("px").parse::<f32>().ok());
            let width = style
                .width
                .or_else(|| attr_px("width"))
                .unwrap_or(DEFAULT_IMAGE_WIDTH)
                .min(available_width);
            let height = style.height.or_else(|| attr_px("height")).unwrap_or(DEFAULT_IMAGE_HEIGHT);
            let rect = Rect { x, y, width, height };
            let fragments = if style.visible {
                vec![Fragment::Replaced {
                    rect,
                    color: IMAGE_PLACEHOLDER,
                }]
            } else {
                Vec::new()
            };
            return LayoutBox {
                rect,
                margin_bottom: style.margin_bottom,
                background: style.background.filter(|_| style.visible),
                fragments,
                children: Vec::new(),
            };
        }

        let width = style
            .width
            .map_or(available_width, |w| w.min(available_width))
            .max(0.0);
        let inner_x = x + style.padding;
        let inner_width = (width - 2.0 * style.padding).max(0.0);
        let mut cursor = y + style.padding;
        let mut fragments = Vec::new();
        let mut children = Vec::new();

        for child in &el.children {
            match child {
                DomNode::Text(text) => {
                    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                    if text.is_empty() {
                        continue;
                    }
                    cursor += layout_text(&text, &style, inner_x, cursor, inner_width, &mut fragments);
                }
                DomNode::Element(child_el) => {
                    let child_box = self.layout_element(child_el, &style, inner_x, cursor, inner_width);
                    cursor += child_box.rect.height + child_box.margin_bottom;
                    children.push(child_box);
                }
            }
        }

        let content_height = cursor - y + style.padding;
        let height = style.height.unwrap_or(content_height);

        LayoutBox {
            rect: Rect { x, y, width, height },
            margin_bottom: style.margin_bottom,
            background: style.background.filter(|_| style.visible),
            fragments,
            children,
        }
    }
}

/// Lay out `text` as wrapped lines; returns the height used
fn layout_text(
    text: &str,
    style: &ComputedStyle,
    x: f32,
    y: f32,
    width: f32,
    fragments: &mut Vec<Fragment>,
) -> f32 {
    let glyph = style.font_size * GLYPH_WIDTH;
    let line_height = style.font_size * LINE_HEIGHT;
    let per_line = ((width / glyph).floor() as usize).max(1);
    let chars = text.chars().count();
    let lines = chars.div_ceil(per_line);

    if style.visible {
        let ink = style.font_size * INK_HEIGHT;
        for line in 0..lines {
            let in_line = (chars - line * per_line).min(per_line);
            fragments.push(Fragment::TextLine {
                rect: Rect {
                    x,
                    y: y + line as f32 * line_height + (line_height - ink) / 2.0,
                    width: (in_line as f32 * glyph).min(width),
                    height: ink,
                },
                color: style.color,
            });
        }
    }
    lines as f32 * line_height
}

/// Lay out `root` at `viewport_width` and record each element's offset box
pub fn assign_boxes(root: &mut DomElement, viewport_width: u32) {
    let engine = LayoutEngine::for_tree(root);
    let tree = engine.layout(root, viewport_width as f32);
    apply_boxes(root, Some(&tree));
}

fn apply_boxes(el: &mut DomElement, layout: Option<&LayoutBox>) {
    el.layout = Some(layout.map(LayoutBox::size).unwrap_or_default());
    let mut boxes = layout.map(|l| l.children.iter());
    for child in &mut el.children {
        if let DomNode::Element(child_el) = child {
            let child_box = boxes.as_mut().and_then(|it| it.next());
            apply_boxes(child_el, child_box);
        }
    }
}
