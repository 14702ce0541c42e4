//! Element tree for report regions
//!
//! A `Document` owns the live tree. Exports only ever see `&DomElement` from
//! it, so any conditioning for print happens on clones. Off-screen
//! containers are attached to a separate layer of the document and must be
//! detached again by whoever attached them.

pub mod style;

use scraper::{ElementRef, Html, Node};
use std::sync::Mutex;
use uuid::Uuid;

/// Tags that never have children or a closing tag
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "wbr",
];

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

/// Tags whose text is not entity-escaped when serialized
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

/// Tags counted as visual content even without text
pub const MEDIA_TAGS: &[&str] = &["img", "svg", "canvas", "video", "picture"];

/// Offset box of an element, in CSS pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoxSize {
    pub width: u32,
    pub height: u32,
}

impl BoxSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomNode {
    Element(DomElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DomElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<DomNode>,
    /// Box assigned by the last layout pass
    pub layout: Option<BoxSize>,
}

impl DomElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            children: Vec::new(),
            layout: None,
        }
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_id(self, id: &str) -> Self {
        self.with_attr("id", id)
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.add_class(class);
        self
    }

    pub fn with_style(self, style: impl Into<String>) -> Self {
        self.with_attr("style", style)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(DomNode::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: DomElement) -> Self {
        self.children.push(DomNode::Element(child));
        self
    }

    pub fn with_layout(mut self, width: u32, height: u32) -> Self {
        self.layout = Some(BoxSize::new(width, height));
        self
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_ascii_lowercase(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self
            .attributes
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.attributes.remove(pos).1)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let classes = match self.attr("class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {}", existing.trim(), class),
            _ => class.to_string(),
        };
        self.set_attr("class", classes);
    }

    /// Append declarations to the inline `style` attribute
    pub fn append_style(&mut self, declarations: &str) {
        let style = match self.attr("style") {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{}; {}", existing.trim().trim_end_matches(';'), declarations)
            }
            _ => declarations.to_string(),
        };
        self.set_attr("style", style);
    }

    // ------------------------------------------------------------------
    // Tree queries
    // ------------------------------------------------------------------

    pub fn offset_size(&self) -> BoxSize {
        self.layout.unwrap_or_default()
    }

    pub fn element_children(&self) -> impl Iterator<Item = &DomElement> {
        self.children.iter().filter_map(|c| match c {
            DomNode::Element(e) => Some(e),
            DomNode::Text(_) => None,
        })
    }

    /// Visit this element and every descendant element, depth first
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a DomElement)) {
        f(self);
        for child in self.element_children() {
            child.walk(f);
        }
    }

    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut DomElement)) {
        f(self);
        for child in &mut self.children {
            if let DomNode::Element(e) = child {
                e.walk_mut(f);
            }
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&DomElement> {
        if self.id() == Some(id) {
            return Some(self);
        }
        self.element_children().find_map(|c| c.find_by_id(id))
    }

    pub fn find_all_by_tag<'a>(&'a self, tag: &str) -> Vec<&'a DomElement> {
        let mut found = Vec::new();
        self.walk(&mut |e| {
            if e.tag == tag {
                found.push(e);
            }
        });
        found
    }

    /// Concatenated text of all descendants, `script`/`style` excluded
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if RAW_TEXT_TAGS.contains(&self.tag.as_str()) {
            return;
        }
        for child in &self.children {
            match child {
                DomNode::Text(t) => out.push_str(t),
                DomNode::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Length in chars of the trimmed text content
    pub fn text_length(&self) -> usize {
        self.text_content().trim().chars().count()
    }

    pub fn contains_media(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if MEDIA_TAGS.contains(&e.tag.as_str()) {
                found = true;
            }
        });
        found
    }

    // ------------------------------------------------------------------
    // Mutation (clones only; the live tree is never borrowed mutably)
    // ------------------------------------------------------------------

    /// Remove every descendant element matching `pred`; returns how many went
    pub fn remove_descendants(&mut self, pred: &impl Fn(&DomElement) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|c| match c {
            DomNode::Element(e) => !pred(e),
            DomNode::Text(_) => true,
        });
        let mut removed = before - self.children.len();
        for child in &mut self.children {
            if let DomNode::Element(e) = child {
                removed += e.remove_descendants(pred);
            }
        }
        removed
    }

    pub fn prepend_child(&mut self, child: DomElement) {
        self.children.insert(0, DomNode::Element(child));
    }

    pub fn clear_layout(&mut self) {
        self.walk_mut(&mut |e| e.layout = None);
    }

    // ------------------------------------------------------------------
    // HTML
    // ------------------------------------------------------------------

    /// Parse an HTML fragment. A single top-level element is returned as-is,
    /// anything else is wrapped in a `div`.
    pub fn parse_fragment(html: &str) -> DomElement {
        let fragment = Html::parse_fragment(html);
        let mut nodes = convert_children(fragment.root_element());

        let only_element = nodes.iter().filter(|n| matches!(n, DomNode::Element(_))).count() == 1
            && nodes.iter().all(|n| match n {
                DomNode::Element(_) => true,
                DomNode::Text(t) => t.trim().is_empty(),
            });
        if only_element {
            if let Some(pos) = nodes.iter().position(|n| matches!(n, DomNode::Element(_))) {
                if let DomNode::Element(e) = nodes.swap_remove(pos) {
                    return e;
                }
            }
        }

        let mut wrapper = DomElement::new("div");
        wrapper.children = nodes;
        wrapper
    }

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        let raw = RAW_TEXT_TAGS.contains(&self.tag.as_str());
        for child in &self.children {
            write_node(child, raw, &mut out);
        }
        out
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }
}

fn convert_children(parent: ElementRef<'_>) -> Vec<DomNode> {
    let mut nodes = Vec::new();
    for child in parent.children() {
        if let Some(el) = ElementRef::wrap(child) {
            let mut element = DomElement::new(el.value().name());
            for (name, value) in el.value().attrs() {
                element.attributes.push((name.to_string(), value.to_string()));
            }
            element.children = convert_children(el);
            nodes.push(DomNode::Element(element));
        } else if let Node::Text(text) = child.value() {
            nodes.push(DomNode::Text(String::from(&**text)));
        }
    }
    nodes
}

fn write_node(node: &DomNode, raw: bool, out: &mut String) {
    match node {
        DomNode::Text(t) if raw => out.push_str(t),
        DomNode::Text(t) => out.push_str(&escape_text(t)),
        DomNode::Element(e) => write_element(e, out),
    }
}

fn write_element(el: &DomElement, out: &mut String) {
    out.push('<');
    out.push_str(&el.tag);
    for (name, value) in &el.attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    out.push('>');
    if is_void_tag(&el.tag) {
        return;
    }
    out.push_str(&el.inner_html());
    out.push_str("</");
    out.push_str(&el.tag);
    out.push('>');
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

// ============================================================================
// Document
// ============================================================================

/// Live document: the rendered tree plus an off-screen layer
#[derive(Debug)]
pub struct Document {
    body: DomElement,
    offscreen: Mutex<Vec<(Uuid, DomElement)>>,
}

impl Document {
    pub fn new(body: DomElement) -> Self {
        Self {
            body,
            offscreen: Mutex::new(Vec::new()),
        }
    }

    /// Parse `html` and lay it out at `viewport_width`, the way a browser
    /// would before anything can be captured.
    pub fn from_html(html: &str, viewport_width: u32) -> Self {
        let mut body = DomElement::parse_fragment(html);
        crate::render::layout::assign_boxes(&mut body, viewport_width);
        Self::new(body)
    }

    pub fn body(&self) -> &DomElement {
        &self.body
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<&DomElement> {
        self.body.find_by_id(id)
    }

    pub fn attach_offscreen(&self, element: DomElement) -> Uuid {
        let id = Uuid::new_v4();
        self.layer().push((id, element));
        id
    }

    pub fn detach_offscreen(&self, id: Uuid) -> Option<DomElement> {
        let mut layer = self.layer();
        let pos = layer.iter().position(|(k, _)| *k == id)?;
        Some(layer.remove(pos).1)
    }

    /// Snapshot of an attached off-screen element
    pub fn offscreen_element(&self, id: Uuid) -> Option<DomElement> {
        self.layer().iter().find(|(k, _)| *k == id).map(|(_, e)| e.clone())
    }

    pub fn offscreen_count(&self) -> usize {
        self.layer().len()
    }

    fn layer(&self) -> std::sync::MutexGuard<'_, Vec<(Uuid, DomElement)>> {
        // A panic while holding the lock leaves the list itself intact
        self.offscreen.lock().unwrap_or_else(|e| e.into_inner())
    }
}
