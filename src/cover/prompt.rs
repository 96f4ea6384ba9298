//! Cover prompt construction.

use scraper::Html;

/// Plain-text excerpt of an article used to seed the cover prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub text: String,
    pub word_count: usize,
    /// The article had more words than went into `text`.
    pub truncated: bool,
}

/// Visible text of sanitized article markup.
pub fn plain_text(content_html: &str) -> String {
    let fragment = Html::parse_fragment(content_html);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `max_words` words of the article, or `None` below `min_words`.
pub fn build_snippet(content_html: &str, max_words: usize, min_words: usize) -> Option<Snippet> {
    let text = plain_text(content_html);
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < min_words {
        return None;
    }

    let taken = words.len().min(max_words);
    Some(Snippet {
        text: words[..taken].join(" "),
        word_count: taken,
        truncated: words.len() > max_words,
    })
}

pub fn build_prompt(title: &str, url: &str, snippet: &Snippet) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Create a book-cover style illustration for the article below. \
         Use a strong central motif drawn from its subject, a restrained palette \
         and no text, letters, logos or watermarks.\n\n",
    );
    prompt.push_str(&format!("Title: {}\n", title));
    prompt.push_str(&format!("Source: {}\n\n", url));
    prompt.push_str("Article excerpt:\n");
    prompt.push_str(&snippet.text);
    prompt.push('\n');
    if snippet.truncated {
        prompt.push_str(&format!(
            "\n(Excerpt truncated to the first {} words of a longer article.)\n",
            snippet.word_count
        ));
    }
    prompt
}

/// Shorter prompt used when the detailed one produced no image.
pub fn fallback_prompt(title: &str) -> String {
    format!(
        "An abstract, editorial book-cover illustration evoking the theme of \"{}\". \
         No text or lettering.",
        title
    )
}
