use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Readable rendition of an article, cached per item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReaderDocument {
    pub title: String,
    pub byline: Option<String>,
    pub excerpt: Option<String>,
    pub site_name: Option<String>,
    /// Cover image declared by the page itself (og:image and friends).
    pub image_url: Option<String>,
    pub word_count: usize,
    pub content_html: String,
    pub retrieved_at: DateTime<Utc>,
}

impl ReaderDocument {
    pub fn passes_gate(&self, min_words: usize) -> bool {
        self.word_count >= min_words
    }
}

/// Stored cover image bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoverBlob {
    pub base64: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl CoverBlob {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.base64)
    }
}

/// Count whitespace-separated words.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_words() {
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("  one\ttwo\nthree  "), 3);
    }

    #[test]
    fn test_gate() {
        let doc = ReaderDocument {
            title: "t".into(),
            byline: None,
            excerpt: None,
            site_name: None,
            image_url: None,
            word_count: 50,
            content_html: String::new(),
            retrieved_at: Utc::now(),
        };
        assert!(doc.passes_gate(50));
        assert!(!doc.passes_gate(51));
    }
}
