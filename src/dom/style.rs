//! Minimal CSS support
//!
//! Enough of CSS to honor the print stylesheets injected before capture:
//! selector lists of compound simple selectors (tag, `.class`, `#id`,
//! `[attr]`, `[attr="v"]`, `*`), declarations with `!important`, and a
//! cascade ordered by importance, inline origin, specificity, then source
//! order. Selectors with pseudo-classes never match. For descendant chains
//! only the rightmost compound is checked.

use super::DomElement;

#[derive(Debug, Clone, PartialEq)]
enum SimpleSelector {
    Universal,
    Tag(String),
    Class(String),
    Id(String),
    Attribute { name: String, value: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    parts: Vec<SimpleSelector>,
}

impl Selector {
    pub fn parse(text: &str) -> Option<Self> {
        let compound = last_compound(text.trim())?;
        if compound.contains(':') {
            return None;
        }

        let mut parts = Vec::new();
        let chars: Vec<char> = compound.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' => {
                    parts.push(SimpleSelector::Universal);
                    i += 1;
                }
                '.' | '#' => {
                    let marker = chars[i];
                    let (ident, next) = read_ident(&chars, i + 1);
                    if ident.is_empty() {
                        return None;
                    }
                    parts.push(if marker == '.' {
                        SimpleSelector::Class(ident)
                    } else {
                        SimpleSelector::Id(ident)
                    });
                    i = next;
                }
                '[' => {
                    let end = chars[i..].iter().position(|&c| c == ']')? + i;
                    let inner: String = chars[i + 1..end].iter().collect();
                    let (name, value) = match inner.split_once('=') {
                        Some((n, v)) => (
                            n.trim().to_ascii_lowercase(),
                            Some(v.trim().trim_matches(|c| c == '"' || c == '\'').to_string()),
                        ),
                        None => (inner.trim().to_ascii_lowercase(), None),
                    };
                    if name.is_empty() {
                        return None;
                    }
                    parts.push(SimpleSelector::Attribute { name, value });
                    i = end + 1;
                }
                _ => {
                    let (ident, next) = read_ident(&chars, i);
                    if ident.is_empty() {
                        return None;
                    }
                    parts.push(SimpleSelector::Tag(ident.to_ascii_lowercase()));
                    i = next;
                }
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(Self { parts })
        }
    }

    pub fn matches(&self, el: &DomElement) -> bool {
        self.parts.iter().all(|part| match part {
            SimpleSelector::Universal => true,
            SimpleSelector::Tag(tag) => el.tag == *tag,
            SimpleSelector::Class(class) => el.has_class(class),
            SimpleSelector::Id(id) => el.id() == Some(id.as_str()),
            SimpleSelector::Attribute { name, value } => match (el.attr(name), value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            },
        })
    }

    /// (ids, classes + attributes, tags)
    pub fn specificity(&self) -> (u32, u32, u32) {
        self.parts.iter().fold((0, 0, 0), |(a, b, c), part| match part {
            SimpleSelector::Id(_) => (a + 1, b, c),
            SimpleSelector::Class(_) | SimpleSelector::Attribute { .. } => (a, b + 1, c),
            SimpleSelector::Tag(_) => (a, b, c + 1),
            SimpleSelector::Universal => (a, b, c),
        })
    }
}

fn last_compound(text: &str) -> Option<&str> {
    // Split on combinators outside of attribute brackets
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            ' ' | '>' | '+' | '~' if depth == 0 => start = i + c.len_utf8(),
            _ => {}
        }
    }
    let compound = text[start..].trim();
    if compound.is_empty() {
        None
    } else {
        Some(compound)
    }
}

fn read_ident(chars: &[char], from: usize) -> (String, usize) {
    let mut end = from;
    while end < chars.len() && (chars[end].is_alphanumeric() || matches!(chars[end], '-' | '_' | '\\')) {
        end += 1;
    }
    (chars[from..end].iter().filter(|&&c| c != '\\').collect(), end)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

/// Parse `a: b; c: d !important`
pub fn parse_declarations(text: &str) -> Vec<Declaration> {
    text.split(';')
        .filter_map(|decl| {
            let (property, value) = decl.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            let mut value = value.trim().to_string();
            let important = value.to_ascii_lowercase().ends_with("!important");
            if important {
                value.truncate(value.len() - "!important".len());
                value = value.trim().to_string();
            }
            if property.is_empty() || value.is_empty() {
                None
            } else {
                Some(Declaration {
                    property,
                    value,
                    important,
                })
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyleRule {
    pub selectors: Vec<Selector>,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stylesheet {
    pub rules: Vec<StyleRule>,
}

impl Stylesheet {
    pub fn parse(css: &str) -> Self {
        let css = strip_comments(css);
        let mut rules = Vec::new();
        let mut rest = css.as_str();

        while let Some(open) = rest.find('{') {
            let prelude = rest[..open].trim();
            let Some(close) = rest[open..].find('}').map(|c| c + open) else {
                break;
            };
            let body = &rest[open + 1..close];
            rest = &rest[close + 1..];

            // At-rules (@page, @media...) are not part of the subset
            if prelude.starts_with('@') || body.contains('{') {
                continue;
            }
            let selectors: Vec<Selector> = prelude.split(',').filter_map(Selector::parse).collect();
            if selectors.is_empty() {
                continue;
            }
            rules.push(StyleRule {
                selectors,
                declarations: parse_declarations(body),
            });
        }

        Self { rules }
    }

    pub fn extend(&mut self, other: Stylesheet) {
        self.rules.extend(other.rules);
    }

    /// Winning value of `property` for `el`, inline `style` attribute included
    pub fn cascaded_value(&self, el: &DomElement, property: &str) -> Option<String> {
        // (important, inline, specificity, order)
        let mut best: Option<((bool, bool, (u32, u32, u32), usize), &str)> = None;
        let mut order = 0usize;
        for rule in &self.rules {
            let specificity = rule
                .selectors
                .iter()
                .filter(|s| s.matches(el))
                .map(Selector::specificity)
                .max();
            let Some(specificity) = specificity else {
                order += rule.declarations.len();
                continue;
            };
            for decl in &rule.declarations {
                order += 1;
                if decl.property != property {
                    continue;
                }
                let key = (decl.important, false, specificity, order);
                if best.as_ref().map_or(true, |(k, _)| key >= *k) {
                    best = Some((key, decl.value.as_str()));
                }
            }
        }

        let inline = el.attr("style").map(parse_declarations).unwrap_or_default();
        let mut winner = best.map(|(k, v)| (k, v.to_string()));
        for decl in inline {
            order += 1;
            if decl.property != property {
                continue;
            }
            let key = (decl.important, true, (0, 0, 0), order);
            if winner.as_ref().map_or(true, |(k, _)| key >= *k) {
                winner = Some((key, decl.value));
            }
        }
        winner.map(|(_, v)| v)
    }
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

// ============================================================================
// Values
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);
    pub const TRANSPARENT: Rgba = Rgba {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub fn is_transparent(&self) -> bool {
        self.a == 0
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "white" => return Some(Self::WHITE),
            "black" => return Some(Self::BLACK),
            "transparent" | "none" => return Some(Self::TRANSPARENT),
            "gray" | "grey" => return Some(Self::rgb(128, 128, 128)),
            "red" => return Some(Self::rgb(255, 0, 0)),
            _ => {}
        }

        if let Some(hex) = value.strip_prefix('#') {
            if !hex.is_ascii() {
                return None;
            }
            let expand = |c: char| c.to_digit(16).map(|d| (d * 17) as u8);
            return match hex.len() {
                3 => {
                    let mut it = hex.chars();
                    Some(Self::rgb(expand(it.next()?)?, expand(it.next()?)?, expand(it.next()?)?))
                }
                6 => Some(Self::rgb(
                    u8::from_str_radix(&hex[0..2], 16).ok()?,
                    u8::from_str_radix(&hex[2..4], 16).ok()?,
                    u8::from_str_radix(&hex[4..6], 16).ok()?,
                )),
                _ => None,
            };
        }

        let args = value
            .strip_prefix("rgba(")
            .or_else(|| value.strip_prefix("rgb("))?
            .strip_suffix(')')?;
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return None;
        }
        let channel = |s: &str| s.parse::<f32>().ok().map(|v| v.clamp(0.0, 255.0) as u8);
        let alpha = match parts.get(3) {
            Some(a) => (a.parse::<f32>().ok()?.clamp(0.0, 1.0) * 255.0).round() as u8,
            None => 255,
        };
        Some(Self {
            r: channel(parts[0])?,
            g: channel(parts[1])?,
            b: channel(parts[2])?,
            a: alpha,
        })
    }
}

/// Resolve a CSS length to pixels. `em` is relative to `font_size`.
pub fn parse_length(value: &str, font_size: f32) -> Option<f32> {
    let value = value.trim().to_ascii_lowercase();
    let (number, factor) = if let Some(n) = value.strip_suffix("px") {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix("pt") {
        (n, 4.0 / 3.0)
    } else if let Some(n) = value.strip_suffix("rem") {
        (n, 16.0)
    } else if let Some(n) = value.strip_suffix("em") {
        (n, font_size)
    } else if value == "0" {
        ("0", 1.0)
    } else {
        return None;
    };
    number.trim().parse::<f32>().ok().map(|n| n * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let el = DomElement::new("div")
            .with_id("main")
            .with_class("hidden")
            .with_attr("role", "button");
        assert!(Selector::parse("div.hidden").unwrap().matches(&el));
        assert!(Selector::parse("#main").unwrap().matches(&el));
        assert!(Selector::parse("[role=\"button\"]").unwrap().matches(&el));
        assert!(Selector::parse("section > .hidden").unwrap().matches(&el));
        assert!(!Selector::parse("span.hidden").unwrap().matches(&el));
        assert!(Selector::parse("button:hover").is_none());
    }

    #[test]
    fn test_cascade_order() {
        let sheet = Stylesheet::parse(
            "/* base */ p { color: red } .note { color: blue } p { color: green }",
        );
        let plain = DomElement::new("p");
        let note = DomElement::new("p").with_class("note");
        assert_eq!(sheet.cascaded_value(&plain, "color").as_deref(), Some("green"));
        assert_eq!(sheet.cascaded_value(&note, "color").as_deref(), Some("blue"));
    }

    #[test]
    fn test_important_beats_inline() {
        let sheet = Stylesheet::parse("* { visibility: visible !important }");
        let el = DomElement::new("div").with_style("visibility: hidden");
        assert_eq!(sheet.cascaded_value(&el, "visibility").as_deref(), Some("visible"));

        let sheet = Stylesheet::parse("* { visibility: visible }");
        assert_eq!(sheet.cascaded_value(&el, "visibility").as_deref(), Some("hidden"));
    }

    #[test]
    fn test_at_rules_skipped() {
        let sheet = Stylesheet::parse("@page { margin: 1cm } h1 { font-size: 28px }");
        assert_eq!(sheet.rules.len(), 1);
    }

    #[test]
    fn test_colors_and_lengths() {
        assert_eq!(Rgba::parse("#fff"), Some(Rgba::WHITE));
        assert_eq!(Rgba::parse("#f9fafb"), Some(Rgba::rgb(0xf9, 0xfa, 0xfb)));
        assert_eq!(Rgba::parse("rgba(0, 0, 0, 0)"), Some(Rgba::TRANSPARENT));
        assert_eq!(parse_length("28px", 16.0), Some(28.0));
        assert_eq!(parse_length("1.5em", 10.0), Some(15.0));
        assert_eq!(parse_length("auto", 16.0), None);
    }

    #[test]
    fn test_non_ascii_hex_is_rejected() {
        assert_eq!(Rgba::parse("#aé123"), None);
        assert_eq!(Rgba::parse("#é1"), None);
        assert_eq!(Rgba::parse("#gg0000"), None);
    }
}
