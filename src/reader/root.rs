//! Heuristic location of the element that holds the article body.

use scraper::{ElementRef, Html, Selector};

use crate::domain::count_words;

/// Page chrome; candidates below these are never article bodies.
const CHROME_TAGS: &[&str] = &["nav", "footer", "header", "aside"];

/// Weight of one paragraph relative to one word.
const PARAGRAPH_WEIGHT: usize = 20;

/// Minimum paragraphs for the largest-text-block fallback.
const MIN_FALLBACK_PARAGRAPHS: usize = 2;

pub(crate) fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Text of an element with text nodes joined by spaces.
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

pub(crate) fn is_under_chrome(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| CHROME_TAGS.contains(&ancestor.value().name()))
}

fn paragraph_count(element: ElementRef<'_>, paragraphs: &Selector) -> usize {
    element.select(paragraphs).count()
}

/// Score used to rank candidate roots: words plus weighted paragraphs.
pub fn root_weight(element: ElementRef<'_>, paragraphs: &Selector) -> usize {
    count_words(&text_of(element)) + paragraph_count(element, paragraphs) * PARAGRAPH_WEIGHT
}

/// Find the most likely article container.
///
/// Every element matching one of `candidates` is scored with
/// [`root_weight`]; elements inside page chrome are skipped. When no
/// candidate selector matches at all, the largest block with at least two
/// paragraphs wins instead.
pub fn locate_content_root<'a>(doc: &'a Html, candidates: &[String]) -> Option<ElementRef<'a>> {
    let paragraphs = selector("p")?;

    let best = candidates
        .iter()
        .filter_map(|css| selector(css))
        .flat_map(|sel| doc.select(&sel).collect::<Vec<_>>())
        .filter(|element| !is_under_chrome(*element))
        .map(|element| (root_weight(element, &paragraphs), element))
        .max_by_key(|(weight, _)| *weight);

    if let Some((weight, element)) = best {
        if weight > 0 {
            return Some(element);
        }
    }

    largest_text_block(doc, &paragraphs)
}

fn largest_text_block<'a>(doc: &'a Html, paragraphs: &Selector) -> Option<ElementRef<'a>> {
    let blocks = selector("div, section, td")?;
    doc.select(&blocks)
        .filter(|element| !is_under_chrome(*element))
        .filter(|element| paragraph_count(*element, paragraphs) >= MIN_FALLBACK_PARAGRAPHS)
        .max_by_key(|element| count_words(&text_of(*element)))
}
