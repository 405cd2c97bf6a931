use scraper::Html;

use crate::domain::{FetchedPage, TransformedPage};

/// The boundary between the queue core and Markdown rendering. Body
/// transformation internals (typography cleanup, attachment link
/// rewriting) are explicitly out of scope; this trait and the minimal
/// implementation below exist so the discovery pipeline has something
/// real to run against in tests, not a stub that always returns the same
/// string.
pub trait Transformer: Send + Sync {
    fn transform(&self, page: &FetchedPage) -> TransformedPage;
}

/// Minimal storage-format-to-Markdown transformer: strips tags and joins
/// text nodes with paragraph breaks. Good enough to produce a stable
/// content hash and exercise the discovery/diff pipeline end to end; a
/// full typographic renderer is out of scope here.
pub struct PlainTextTransformer;

impl Transformer for PlainTextTransformer {
    fn transform(&self, page: &FetchedPage) -> TransformedPage {
        let document = Html::parse_document(&page.body_html);
        let text: String = document
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ");
        let markdown = format!("# {}\n\n{}\n", page.title, text.trim());
        let content_hash = blake3::hash(markdown.as_bytes()).to_hex().to_string();
        TransformedPage { markdown, content_hash }
    }
}
