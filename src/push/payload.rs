use serde_json::{json, Value};
use url::Url;

use crate::domain::{Item, ReaderDocument};

pub const EVENT_TYPE: &str = "item.ready";
pub const SOURCE: &str = "dogear";
pub const THREAD_ID: &str = "dogear.saved";
pub const CATEGORY: &str = "ARTICLE_READY";

/// Longest alert body we send before cutting at a word boundary.
const MAX_BODY_CHARS: usize = 180;

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let cut = match cut.rfind(char::is_whitespace) {
        Some(at) if at > 0 => &cut[..at],
        _ => cut.as_str(),
    };
    format!("{}…", cut.trim_end())
}

/// Notification for an item whose reader document and cover both exist.
pub fn ready_payload(item: &Item, doc: Option<&ReaderDocument>, event_id: &str) -> Value {
    let title = doc
        .map(|d| d.title.as_str())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| item.display_title());
    let subtitle = doc
        .and_then(|d| d.site_name.clone())
        .or_else(|| host_of(&item.url))
        .unwrap_or_default();
    let body = doc
        .and_then(|d| d.excerpt.as_deref())
        .map(|excerpt| clip(excerpt, MAX_BODY_CHARS))
        .unwrap_or_else(|| "Ready to read".to_string());
    let has_cover = item.cover.updated_at.is_some();

    let mut aps = json!({
        "alert": {
            "title": title,
            "subtitle": subtitle,
            "body": body,
        },
        "sound": "default",
        "thread-id": THREAD_ID,
        "category": CATEGORY,
        "interruption-level": "active",
        "relevance-score": 0.5,
    });
    if has_cover {
        aps["mutable-content"] = json!(1);
    }

    json!({
        "aps": aps,
        "type": EVENT_TYPE,
        "source": SOURCE,
        "itemId": item.id,
        "eventId": event_id,
        "savedAt": item.saved_at,
        "notification": {
            "title": title,
            "subtitle": subtitle,
            "body": body,
        },
        "data": {
            "url": item.url,
            "wordCount": doc.map(|d| d.word_count),
            "hasCover": has_cover,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document() -> ReaderDocument {
        ReaderDocument {
            title: "A Long Read".into(),
            byline: None,
            excerpt: Some("An excerpt about things.".into()),
            site_name: None,
            image_url: None,
            word_count: 1200,
            content_html: String::new(),
            retrieved_at: Utc::now(),
        }
    }

    #[test]
    fn test_payload_shape() {
        let mut item = Item::new("default", "https://www.example.com/post", None);
        item.cover.updated_at = Some(Utc::now());
        let payload = ready_payload(&item, Some(&document()), "evt-1");

        assert_eq!(payload["aps"]["alert"]["title"], "A Long Read");
        assert_eq!(payload["aps"]["alert"]["subtitle"], "example.com");
        assert_eq!(payload["aps"]["alert"]["body"], "An excerpt about things.");
        assert_eq!(payload["aps"]["thread-id"], THREAD_ID);
        assert_eq!(payload["aps"]["mutable-content"], 1);
        assert_eq!(payload["type"], EVENT_TYPE);
        assert_eq!(payload["itemId"], item.id.as_str());
        assert_eq!(payload["eventId"], "evt-1");
        assert_eq!(payload["data"]["wordCount"], 1200);
        assert_eq!(payload["notification"]["title"], "A Long Read");
    }

    #[test]
    fn test_no_mutable_content_without_cover() {
        let item = Item::new("default", "https://example.com/post", Some("Saved".into()));
        let payload = ready_payload(&item, None, "evt-2");
        assert!(payload["aps"].get("mutable-content").is_none());
        assert_eq!(payload["aps"]["alert"]["title"], "Saved");
        assert_eq!(payload["aps"]["alert"]["body"], "Ready to read");
    }

    #[test]
    fn test_clip_on_word_boundary() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("one two three four", 10), "one two…");
    }
}
