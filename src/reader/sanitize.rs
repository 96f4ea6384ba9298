//! HTML sanitizer for extracted article content.
//!
//! Walks a parsed subtree and re-serializes it:
//! - disallowed tags are dropped with their whole subtree
//! - tags outside the allow-list are unwrapped (children kept)
//! - kept tags lose every attribute outside their per-tag allow-list
//! - `href`/`src`/`srcset` are made absolute against the page URL
//! - lazy-loaded images get their `src` back from `data-*` attributes

use html_escape::{encode_double_quoted_attribute, encode_text};
use scraper::{ElementRef, Node};
use url::Url;

/// Removed together with everything inside them.
const DROP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "frame", "frameset", "object", "embed",
    "applet", "canvas", "svg", "math", "video", "audio", "track", "form", "input", "button",
    "select", "option", "textarea", "label", "fieldset", "dialog", "menu", "nav", "header",
    "footer", "aside", "link", "meta", "base", "head", "title",
];

/// Kept as elements. Anything else is unwrapped.
const ALLOW_TAGS: &[&str] = &[
    "p", "br", "hr", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "dl", "dt", "dd",
    "blockquote", "q", "pre", "code", "kbd", "samp", "var", "em", "strong", "b", "i", "u", "s",
    "del", "ins", "mark", "small", "sub", "sup", "abbr", "cite", "time", "a", "img", "picture",
    "source", "figure", "figcaption", "table", "caption", "thead", "tbody", "tfoot", "tr", "th",
    "td",
];

const VOID_TAGS: &[&str] = &["br", "hr", "img", "source"];

/// Elements that separate words in the plain-text rendition.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "hr", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "dl", "dt", "dd",
    "blockquote", "pre", "figure", "figcaption", "table", "tr", "th", "td", "div", "section",
    "article", "main",
];

const LAZY_SRC_ATTRS: &[&str] = &["data-src", "data-original", "data-lazy-src", "data-url"];

fn allowed_attrs(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "title"],
        "img" => &["src", "srcset", "alt", "title", "width", "height"],
        "source" => &["srcset", "type", "media"],
        "td" | "th" => &["colspan", "rowspan"],
        "ol" => &["start"],
        "time" => &["datetime"],
        "abbr" => &["title"],
        _ => &[],
    }
}

/// Sanitized markup plus its visible text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sanitized {
    pub html: String,
    pub text: String,
}

/// Sanitize the children of `root`. The root element itself is not emitted.
pub fn sanitize(root: ElementRef<'_>, base: &Url) -> Sanitized {
    let mut out = Sanitized::default();
    walk(root, base, &mut out);
    out.html = out.html.trim().to_string();
    out
}

fn walk(element: ElementRef<'_>, base: &Url, out: &mut Sanitized) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let text: &str = text;
                out.html.push_str(&encode_text(text));
                out.text.push_str(text);
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    emit_element(child, base, out);
                }
            }
            _ => {}
        }
    }
}

fn emit_element(element: ElementRef<'_>, base: &Url, out: &mut Sanitized) {
    let tag = element.value().name();

    if DROP_TAGS.contains(&tag) {
        return;
    }

    let is_block = BLOCK_TAGS.contains(&tag);
    if is_block {
        out.text.push(' ');
    }

    if !ALLOW_TAGS.contains(&tag) {
        walk(element, base, out);
        if is_block {
            out.text.push(' ');
        }
        return;
    }

    let attrs = collect_attrs(element, tag, base);
    if tag == "img" && !attrs.iter().any(|(name, _)| name == "src") {
        // Nothing to show
        return;
    }

    out.html.push('<');
    out.html.push_str(tag);
    for (name, value) in &attrs {
        out.html.push(' ');
        out.html.push_str(name);
        out.html.push_str("=\"");
        out.html.push_str(&encode_double_quoted_attribute(value));
        out.html.push('"');
    }
    out.html.push('>');

    if VOID_TAGS.contains(&tag) {
        if is_block {
            out.text.push(' ');
        }
        return;
    }

    walk(element, base, out);
    out.html.push_str("</");
    out.html.push_str(tag);
    out.html.push('>');
    if is_block {
        out.text.push(' ');
    }
}

fn collect_attrs(element: ElementRef<'_>, tag: &str, base: &Url) -> Vec<(String, String)> {
    let allowed = allowed_attrs(tag);
    let value = element.value();
    let mut attrs = Vec::new();

    for (name, raw) in value.attrs() {
        let name = name.to_ascii_lowercase();
        if name.starts_with("on") || !allowed.contains(&name.as_str()) {
            continue;
        }
        if let Some(cleaned) = clean_attr(tag, &name, raw, base) {
            attrs.push((name, cleaned));
        }
    }

    if tag == "img" {
        if !attrs.iter().any(|(name, _)| name == "src") {
            let lazy = LAZY_SRC_ATTRS
                .iter()
                .filter_map(|attr| value.attr(attr))
                .find_map(|raw| absolutize_image(raw, base));
            if let Some(src) = lazy {
                attrs.push(("src".to_string(), src));
            }
        }
        if !attrs.iter().any(|(name, _)| name == "srcset") {
            if let Some(srcset) = value
                .attr("data-srcset")
                .and_then(|raw| absolutize_srcset(raw, base))
            {
                attrs.push(("srcset".to_string(), srcset));
            }
        }
    }

    attrs.sort_by(|a, b| a.0.cmp(&b.0));
    attrs
}

fn clean_attr(tag: &str, name: &str, raw: &str, base: &Url) -> Option<String> {
    match (tag, name) {
        ("img", "src") => absolutize_image(raw, base),
        (_, "href") | (_, "src") => absolutize(raw, base),
        (_, "srcset") => absolutize_srcset(raw, base),
        _ => Some(raw.to_string()),
    }
}

/// Resolve `raw` against `base`. Script and `data:` URLs are refused.
pub fn absolutize(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lowered = raw.to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("vbscript:")
        || lowered.starts_with("data:")
    {
        return None;
    }
    if lowered.starts_with("mailto:") {
        return Some(raw.to_string());
    }
    base.join(raw).ok().map(String::from)
}

/// Like [`absolutize`], but inline `data:image/` sources are kept.
pub fn absolutize_image(raw: &str, base: &Url) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.to_ascii_lowercase().starts_with("data:image/") {
        return Some(trimmed.to_string());
    }
    absolutize(trimmed, base)
}

fn absolutize_srcset(raw: &str, base: &Url) -> Option<String> {
    let candidates: Vec<String> = raw
        .split(',')
        .filter_map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let url = absolutize_image(parts.next()?, base)?;
            let descriptor: Vec<&str> = parts.collect();
            if descriptor.is_empty() {
                Some(url)
            } else {
                Some(format!("{} {}", url, descriptor.join(" ")))
            }
        })
        .collect();

    if candidates.is_empty() {
        None
    } else {
        Some(candidates.join(", "))
    }
}
