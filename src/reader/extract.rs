//! Static extraction strategies.
//!
//! Each strategy is a pure function from a fetched page to an optional
//! document. [`run_chain`] tries them in order and keeps the first one that
//! clears the minimum-word gate.

use std::collections::HashMap;

use chrono::Utc;
use scraper::{ElementRef, Html};
use url::Url;

use crate::domain::{count_words, ReaderDocument};
use crate::reader::root::{is_under_chrome, locate_content_root, selector, text_of};
use crate::reader::sanitize::{absolutize, sanitize};

/// Paragraph-like elements smaller than this don't contribute to scores.
const MIN_PARAGRAPH_CHARS: usize = 25;

const POSITIVE_HINTS: &[&str] = &[
    "article", "body", "content", "entry", "main", "page", "post", "text", "blog", "story",
];

const NEGATIVE_HINTS: &[&str] = &[
    "comment", "meta", "footer", "footnote", "sidebar", "sponsor", "share", "social", "nav",
    "menu", "promo", "related", "widget", "banner", "advert",
];

/// Input to a strategy.
pub struct Page<'a> {
    pub html: &'a str,
    pub base_url: &'a Url,
    pub fallback_title: Option<&'a str>,
    pub min_words: usize,
    pub content_selectors: &'a [String],
}

pub type Strategy = fn(&Page<'_>) -> Option<ReaderDocument>;

/// Strategies in the order they are attempted.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("readability", readability_strategy),
    ("content-root", content_root_strategy),
];

pub fn run_chain(page: &Page<'_>) -> Option<ReaderDocument> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let doc = strategy(page);
        match &doc {
            Some(doc) => tracing::debug!("{} strategy produced {} words", name, doc.word_count),
            None => tracing::debug!("{} strategy did not clear the gate", name),
        }
        doc
    })
}

/// Whole-document extraction: score paragraph containers and keep the best.
pub fn readability_strategy(page: &Page<'_>) -> Option<ReaderDocument> {
    let doc = Html::parse_document(page.html);
    let body = selector("body").and_then(|sel| doc.select(&sel).next())?;
    let candidate = best_candidate(body)?;
    build_document(&doc, candidate, page)
}

/// Locate the article container first, then extract inside it.
pub fn content_root_strategy(page: &Page<'_>) -> Option<ReaderDocument> {
    let doc = Html::parse_document(page.html);
    let root = locate_content_root(&doc, page.content_selectors)?;

    if let Some(candidate) = best_candidate(root) {
        if let Some(document) = build_document(&doc, candidate, page) {
            return Some(document);
        }
    }
    build_document(&doc, root, page)
}

fn build_document(doc: &Html, content: ElementRef<'_>, page: &Page<'_>) -> Option<ReaderDocument> {
    let sanitized = sanitize(content, page.base_url);
    let word_count = count_words(&sanitized.text);
    if word_count < page.min_words {
        return None;
    }

    let meta = Metadata::from_document(doc, page.base_url);
    let excerpt = meta.excerpt.or_else(|| first_sentence(&sanitized.text));
    let title = meta
        .title
        .or_else(|| page.fallback_title.map(String::from))
        .unwrap_or_else(|| "Untitled".to_string());

    Some(ReaderDocument {
        title,
        byline: meta.byline,
        excerpt,
        site_name: meta.site_name,
        image_url: meta.image_url,
        word_count,
        content_html: sanitized.html,
        retrieved_at: Utc::now(),
    })
}

fn first_sentence(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().take(40).collect();
    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

// Candidate scoring

fn class_weight(element: ElementRef<'_>) -> f64 {
    let value = element.value();
    let hints = format!(
        "{} {}",
        value.attr("class").unwrap_or_default(),
        value.attr("id").unwrap_or_default()
    )
    .to_lowercase();

    let mut weight = 0.0;
    if NEGATIVE_HINTS.iter().any(|hint| hints.contains(hint)) {
        weight -= 25.0;
    }
    if POSITIVE_HINTS.iter().any(|hint| hints.contains(hint)) {
        weight += 25.0;
    }
    weight
}

fn tag_weight(element: ElementRef<'_>) -> f64 {
    match element.value().name() {
        "article" => 10.0,
        "div" | "section" | "main" => 5.0,
        "pre" | "td" | "blockquote" => 3.0,
        "form" | "ol" | "ul" | "dl" | "li" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    }
}

fn link_density(element: ElementRef<'_>) -> f64 {
    let total = text_of(element).trim().chars().count();
    if total == 0 {
        return 0.0;
    }
    let Some(links) = selector("a") else {
        return 0.0;
    };
    let linked: usize = element
        .select(&links)
        .map(|a| text_of(a).trim().chars().count())
        .sum();
    linked as f64 / total as f64
}

fn is_within(scope: ElementRef<'_>, element: ElementRef<'_>) -> bool {
    element.id() == scope.id() || element.ancestors().any(|node| node.id() == scope.id())
}

/// Highest-scoring paragraph container under `scope`.
pub fn best_candidate(scope: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let paragraphs = selector("p, pre, td")?;
    let mut scores = HashMap::new();

    for paragraph in scope.select(&paragraphs) {
        if is_under_chrome(paragraph) {
            continue;
        }
        let text = text_of(paragraph);
        let length = text.trim().chars().count();
        if length < MIN_PARAGRAPH_CHARS {
            continue;
        }

        let score = 1.0 + text.matches(',').count() as f64 + (length as f64 / 100.0).min(3.0);

        let ancestors = paragraph
            .ancestors()
            .filter_map(ElementRef::wrap)
            .take(2)
            .filter(|ancestor| is_within(scope, *ancestor))
            .enumerate();
        for (level, ancestor) in ancestors {
            let entry = scores.entry(ancestor.id()).or_insert_with(|| {
                (ancestor, tag_weight(ancestor) + class_weight(ancestor))
            });
            entry.1 += if level == 0 { score } else { score / 2.0 };
        }
    }

    scores
        .into_values()
        .map(|(element, score)| (element, score * (1.0 - link_density(element))))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(element, _)| element)
}

// Metadata

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub byline: Option<String>,
    pub excerpt: Option<String>,
    pub site_name: Option<String>,
    pub image_url: Option<String>,
}

impl Metadata {
    pub fn from_document(doc: &Html, base: &Url) -> Self {
        let title = meta_content(doc, &["meta[property=\"og:title\"]", "meta[name=\"twitter:title\"]"])
            .or_else(|| element_text(doc, "title"))
            .or_else(|| element_text(doc, "h1"));

        let byline = meta_content(doc, &["meta[name=\"author\"]", "meta[property=\"article:author\"]"])
            .or_else(|| element_text(doc, "[rel=\"author\"]"))
            .or_else(|| element_text(doc, ".byline"));

        let excerpt = meta_content(
            doc,
            &[
                "meta[property=\"og:description\"]",
                "meta[name=\"description\"]",
                "meta[name=\"twitter:description\"]",
            ],
        );

        let site_name = meta_content(doc, &["meta[property=\"og:site_name\"]"]);

        let image_url = meta_content(
            doc,
            &[
                "meta[property=\"og:image\"]",
                "meta[property=\"og:image:url\"]",
                "meta[name=\"twitter:image\"]",
            ],
        )
        .and_then(|raw| absolutize(&raw, base))
        .filter(|url| url.starts_with("http"));

        Self {
            title,
            byline,
            excerpt,
            site_name,
            image_url,
        }
    }
}

fn meta_content(doc: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        let sel = selector(css)?;
        doc.select(&sel)
            .filter_map(|el| el.value().attr("content"))
            .map(|content| content.trim().to_string())
            .find(|content| !content.is_empty())
    })
}

fn element_text(doc: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    doc.select(&sel)
        .map(|el| text_of(el).split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|text| !text.is_empty())
}
