//! Main-text extraction from fetched pages.
//!
//! Picks the most likely content container, drops page chrome (navigation,
//! scripts, ads, cookie banners), and flattens what remains into one cleaned
//! block of text suitable for a dataset record.

mod cleanup;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use topicharvest_shared::{DatasetRecord, FailureKind, PageContent, Topic};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a page produced no usable record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("extracted text too short: {len} chars (minimum {min})")]
    TooShort { len: usize, min: usize },

    #[error("malformed content: {0}")]
    Malformed(String),
}

impl ExtractError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::TooShort { .. } => FailureKind::TooShort,
            Self::Malformed(_) => FailureKind::Malformed,
        }
    }
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// Content containers in priority order.
const ROOT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    ".post-content, .entry-content, .article-body, .article-content, .main-content, #content, .content",
    "body",
];

/// Elements whose subtree never contributes text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "iframe", "svg",
    "template", "button", "select",
];

/// Elements collected as one block of text each.
const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "td",
];

/// Inline elements that do not separate words.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "cite", "code", "em", "i", "kbd", "mark", "q", "s", "small", "span",
    "strong", "sub", "sup", "time", "u", "var",
];

static ROOTS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ROOT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

static TITLE: LazyLock<Option<Selector>> = LazyLock::new(|| Selector::parse("title").ok());

/// Class/id tokens marking ads, cookie banners, sidebars and similar chrome.
///
/// Matched one whitespace-separated token at a time.
static NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(^|[_-])(ads?|advert\w*|sponsor\w*|promo\w*|cookie\w*|consent|gdpr|sidebar|popup|modal|newsletter|share|social|breadcrumbs?)($|[_-])",
    )
    .expect("valid regex")
});

/// Layout-state prefixes (`no-sidebar`, `has-sidebar`) that describe the page
/// rather than mark a chrome element.
const LAYOUT_PREFIXES: &[&str] = &["no-", "no_", "has-", "has_", "with-", "with_"];

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Turns a [`PageContent`] into a [`DatasetRecord`].
///
/// Extraction is a pure function of the page: the same page always yields the
/// same record, including `extracted_at`, which is taken from the fetch time.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    min_text_chars: usize,
}

impl ContentExtractor {
    pub fn new(min_text_chars: usize) -> Self {
        Self { min_text_chars }
    }

    pub fn min_text_chars(&self) -> usize {
        self.min_text_chars
    }

    #[instrument(skip_all, fields(url = %page.url))]
    pub fn extract(&self, page: &PageContent, topic: &Topic) -> Result<DatasetRecord, ExtractError> {
        if page.body.trim().is_empty() {
            return Err(ExtractError::Malformed("empty body".into()));
        }
        if page.body.contains('\0') {
            return Err(ExtractError::Malformed("binary content".into()));
        }

        let (text, title) = match page.content_type.as_deref() {
            Some("text/plain") => (cleanup::run_pipeline(&page.body), None),
            _ => extract_html(&page.body),
        };

        let len = text.chars().count();
        if len < self.min_text_chars {
            return Err(ExtractError::TooShort {
                len,
                min: self.min_text_chars,
            });
        }
        debug!(len, "extracted text");

        Ok(DatasetRecord {
            url: page.url.clone(),
            topic: topic.clone(),
            text,
            extracted_at: page.fetched_at,
            title,
        })
    }
}

/// Cleaned main text and `<title>` of an HTML document.
fn extract_html(html: &str) -> (String, Option<String>) {
    let doc = Html::parse_document(html);

    let title = TITLE
        .as_ref()
        .and_then(|sel| doc.select(sel).next())
        .map(|el| cleanup::collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let root = content_root(&doc);
    let mut blocks = Vec::new();
    collect_blocks(root, &mut blocks);
    let raw = if blocks.is_empty() {
        let mut all = String::new();
        collect_text(root, &mut all);
        all
    } else {
        blocks.join("\n")
    };

    (cleanup::run_pipeline(&raw), title)
}

fn content_root(doc: &Html) -> ElementRef<'_> {
    ROOTS
        .iter()
        .find_map(|sel| {
            doc.select(sel)
                .find(|el| !is_skipped(el) && !has_skipped_ancestor(el))
        })
        .unwrap_or_else(|| doc.root_element())
}

fn has_skipped_ancestor(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| is_skipped(&a))
}

fn is_skipped(el: &ElementRef<'_>) -> bool {
    let value = el.value();
    // Document-level classes describe the layout, not chrome.
    if matches!(value.name(), "html" | "body") {
        return false;
    }
    if SKIP_TAGS.contains(&value.name()) {
        return true;
    }
    if value.attr("aria-hidden") == Some("true") || value.attr("hidden").is_some() {
        return true;
    }
    value.attr("class").is_some_and(is_noise) || value.id().is_some_and(is_noise)
}

fn is_noise(attr: &str) -> bool {
    attr.split_whitespace().any(|token| {
        let lower = token.to_ascii_lowercase();
        !LAYOUT_PREFIXES.iter().any(|p| lower.starts_with(p)) && NOISE_RE.is_match(token)
    })
}

/// Push the text of each block-level element under `el`, outermost first.
fn collect_blocks(el: ElementRef<'_>, blocks: &mut Vec<String>) {
    for child in el.children().filter_map(ElementRef::wrap) {
        if is_skipped(&child) {
            continue;
        }
        if BLOCK_TAGS.contains(&child.value().name()) {
            let mut text = String::new();
            collect_text(child, &mut text);
            let text = cleanup::collapse_whitespace(&text);
            if !text.is_empty() {
                blocks.push(text);
            }
        } else {
            collect_blocks(child, blocks);
        }
    }
}

/// All text under `el`, skipping chrome subtrees and spacing out block elements.
fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if is_skipped(&child_el) {
                continue;
            }
            let spaced = !INLINE_TAGS.contains(&child_el.value().name());
            if spaced {
                out.push(' ');
            }
            collect_text(child_el, out);
            if spaced {
                out.push(' ');
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn page(body: &str, content_type: Option<&str>) -> PageContent {
        PageContent {
            url: "https://example.com/post".into(),
            body: body.into(),
            http_status: 200,
            content_type: content_type.map(str::to_string),
            fetched_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            attempts: 1,
        }
    }

    fn topic() -> Topic {
        Topic::new("rust").unwrap()
    }

    const ARTICLE: &str = r#"<html>
      <head><title>  Ownership
        in Rust </title><style>p { color: red }</style></head>
      <body>
        <header><nav><a href="/">Home</a> <a href="/blog">Blog</a></nav></header>
        <div class="cookie-banner"><p>We use cookies to improve your experience.</p></div>
        <article>
          <h1>Understanding   ownership</h1>
          <p>Every value in Rust has a single <em>owner</em>.</p>
          <div class="ad-slot"><p>Buy our course today!</p></div>
          <ul><li>Moves transfer ownership.</li><li>Borrows do not.</li></ul>
          <script>track("pageview")</script>
        </article>
        <aside class="sidebar"><p>Related posts</p></aside>
        <footer><p>Copyright 2024</p></footer>
      </body></html>"#;

    #[test]
    fn extracts_article_text_without_chrome() {
        let record = ContentExtractor::new(10)
            .extract(&page(ARTICLE, Some("text/html")), &topic())
            .unwrap();

        assert_eq!(
            record.text,
            "Understanding ownership Every value in Rust has a single owner. Moves transfer ownership. Borrows do not."
        );
        assert_eq!(record.title.as_deref(), Some("Ownership in Rust"));
        assert_eq!(record.topic, topic());
        assert_eq!(record.url, "https://example.com/post");
    }

    #[test]
    fn extraction_is_deterministic() {
        let extractor = ContentExtractor::new(10);
        let p = page(ARTICLE, Some("text/html"));
        assert_eq!(extractor.extract(&p, &topic()), extractor.extract(&p, &topic()));
    }

    #[test]
    fn falls_back_to_main_then_body() {
        let html = r#"<html><body><nav>Menu</nav><main><p>Main content paragraph.</p></main></body></html>"#;
        let record = ContentExtractor::new(5).extract(&page(html, None), &topic()).unwrap();
        assert_eq!(record.text, "Main content paragraph.");

        let html = r#"<html><body><div><p>Only body text here.</p></div><footer>Foot</footer></body></html>"#;
        let record = ContentExtractor::new(5).extract(&page(html, None), &topic()).unwrap();
        assert_eq!(record.text, "Only body text here.");
    }

    const PARAGRAPH: &str = "Borrowing lets code read a value without taking ownership, and the checker proves no reference outlives its owner.";

    #[test]
    fn layout_classes_on_body_do_not_hide_the_page() {
        let html = format!(
            r#"<html><body class="page no-sidebar has-sidebar-left"><div><p>{PARAGRAPH}</p></div></body></html>"#
        );
        let record = ContentExtractor::new(50).extract(&page(&html, None), &topic()).unwrap();
        assert_eq!(record.text, PARAGRAPH);
    }

    #[test]
    fn layout_prefixed_tokens_are_not_chrome() {
        assert!(!is_noise("page no-sidebar"));
        assert!(!is_noise("with-share-bar"));
        assert!(is_noise("widget sidebar-left"));
        assert!(is_noise("cookie-banner"));
        assert!(!is_noise("shareholder-letter"));
    }

    #[test]
    fn container_inside_chrome_is_not_the_root() {
        let html = format!(
            r#"<html><body><main><p>{PARAGRAPH}</p></main><aside><article><p>Related: short teaser card text here.</p></article></aside></body></html>"#
        );
        let record = ContentExtractor::new(50).extract(&page(&html, None), &topic()).unwrap();
        assert_eq!(record.text, PARAGRAPH);
    }

    #[test]
    fn container_under_noise_class_is_not_the_root() {
        let html = format!(
            r#"<html><body><div class="related-posts sidebar"><article><p>Teaser.</p></article></div><div class="content"><p>{PARAGRAPH}</p></div></body></html>"#
        );
        let record = ContentExtractor::new(50).extract(&page(&html, None), &topic()).unwrap();
        assert_eq!(record.text, PARAGRAPH);
    }

    #[test]
    fn uses_all_root_text_when_no_blocks() {
        let html = r#"<html><body><main><div>First part</div><div>second <b>part</b></div></main></body></html>"#;
        let record = ContentExtractor::new(5).extract(&page(html, None), &topic()).unwrap();
        assert_eq!(record.text, "First part second part");
    }

    #[test]
    fn short_text_is_rejected() {
        let html = "<html><body><p>Tiny page</p></body></html>";
        let err = ContentExtractor::new(50)
            .extract(&page(html, Some("text/html")), &topic())
            .unwrap_err();
        assert_eq!(err, ExtractError::TooShort { len: 9, min: 50 });
        assert_eq!(err.failure_kind(), FailureKind::TooShort);
    }

    #[test]
    fn length_is_counted_in_chars() {
        let html = "<html><body><p>ééééé</p></body></html>";
        let record = ContentExtractor::new(5).extract(&page(html, None), &topic());
        assert!(record.is_ok());
    }

    #[test]
    fn plain_text_skips_html_parsing() {
        let body = "  Plain   notes about <b>tags</b>\n\nand more.  ";
        let record = ContentExtractor::new(5)
            .extract(&page(body, Some("text/plain")), &topic())
            .unwrap();
        assert_eq!(record.text, "Plain notes about <b>tags</b> and more.");
        assert!(record.title.is_none());
    }

    #[test]
    fn empty_body_is_malformed() {
        let err = ContentExtractor::new(1)
            .extract(&page("   \n", Some("text/html")), &topic())
            .unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
        assert_eq!(err.failure_kind(), FailureKind::Malformed);
    }
}
