use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::domain::{CoverBlob, Item, ReaderDocument};

/// Longest filename stem used for the attachment.
const MAX_STEM_CHARS: usize = 60;

/// Self-contained HTML file for a reading device.
pub fn kindle_document(item: &Item, doc: &ReaderDocument, cover: Option<&CoverBlob>) -> String {
    let title = item.title.as_deref().unwrap_or(&doc.title);
    let mut html = String::with_capacity(doc.content_html.len() + 1024);

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", encode_text(title)));
    if let Some(byline) = &doc.byline {
        html.push_str(&format!(
            "<meta name=\"author\" content=\"{}\">\n",
            encode_double_quoted_attribute(byline)
        ));
    }
    html.push_str("</head>\n<body>\n");

    if let Some(cover) = cover {
        html.push_str(&format!(
            "<p><img src=\"{}\" alt=\"Cover\"></p>\n",
            encode_double_quoted_attribute(&cover.data_uri())
        ));
    }

    html.push_str(&format!("<h1>{}</h1>\n", encode_text(title)));

    let mut meta = Vec::new();
    if let Some(byline) = &doc.byline {
        meta.push(encode_text(byline).to_string());
    }
    if let Some(site) = &doc.site_name {
        meta.push(encode_text(site).to_string());
    }
    if !meta.is_empty() {
        html.push_str(&format!("<p><em>{}</em></p>\n", meta.join(" · ")));
    }
    html.push_str(&format!(
        "<p><a href=\"{}\">{}</a></p>\n<hr>\n",
        encode_double_quoted_attribute(&item.url),
        encode_text(&item.url)
    ));

    html.push_str(&doc.content_html);
    html.push_str("\n</body>\n</html>\n");
    html
}

/// Filesystem-safe attachment name derived from the title.
pub fn attachment_filename(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    let stem: String = stem.chars().take(MAX_STEM_CHARS).collect();
    if stem.is_empty() {
        "article.html".to_string()
    } else {
        format!("{}.html", stem)
    }
}
