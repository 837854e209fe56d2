//! Text extraction and cleaning.
//!
//! Feed markup and crawled pages go through the same line rules: blank
//! lines dropped, "The post … appeared first on …" promo paragraphs
//! dropped, exact duplicate lines removed keeping the first occurrence.
//! [`ContentNormalizer`] applies those rules once more to every fetched
//! article and then gates on body length, so thin items never reach the
//! analysis service.

use crate::models::Article;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};

static BOILERPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bthe post\b.*\bappeared first on\b").unwrap());

static BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p, h1, h2, h3, h4, h5, h6, li, blockquote").unwrap());

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());

/// Feed-embedded media and code never contribute text.
const FEED_SKIP: &[&str] = &["script", "style", "img", "figure", "figcaption"];
const PAGE_SKIP: &[&str] = &["script", "style", "noscript", "template"];

pub fn is_boilerplate(line: &str) -> bool {
    BOILERPLATE.is_match(line)
}

/// Collapse runs of whitespace inside a line.
fn squash(line: &str) -> String {
    line.split_whitespace().join(" ")
}

/// Apply the line rules to plain text.
pub fn clean_text(text: &str) -> String {
    text.lines()
        .map(squash)
        .filter(|line| !line.is_empty())
        .filter(|line| !is_boilerplate(line))
        .unique()
        .join("\n\n")
}

/// Text of `element`, skipping subtrees whose tag is in `skip`.
fn text_without(element: ElementRef<'_>, skip: &[&str], out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                if skip.contains(&el.name()) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    text_without(child_el, skip, out);
                    if matches!(el.name(), "br" | "p" | "div" | "li") {
                        out.push('\n');
                    }
                }
            }
            _ => {}
        }
    }
}

fn inside_skipped(element: ElementRef<'_>, skip: &[&str]) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| skip.contains(&a.value().name()))
}

/// Clean the concatenated description/summary/content markup of a feed entry.
///
/// Paragraph-level blocks become lines. Markup without any block elements
/// (plain-text descriptions) falls back to its whole text.
pub fn clean_feed_html(raw: &str) -> String {
    // Some feeds ship double-escaped newlines and quotes.
    let unescaped = raw.replace("\\n", "\n").replace("\\\"", "\"");
    let fragment = Html::parse_fragment(&unescaped);

    let mut lines = Vec::new();
    for block in fragment.select(&BLOCKS) {
        if inside_skipped(block, FEED_SKIP) {
            continue;
        }
        let mut text = String::new();
        text_without(block, FEED_SKIP, &mut text);
        lines.push(text);
    }

    if lines.is_empty() {
        let mut text = String::new();
        text_without(fragment.root_element(), FEED_SKIP, &mut text);
        return clean_text(&text);
    }
    clean_text(&lines.join("\n"))
}

/// Visible text and title of a crawled article page.
pub fn page_text(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .chain(document.select(&H1))
        .map(|el| squash(&el.text().collect::<String>()))
        .find(|t| !t.is_empty());

    let mut text = String::new();
    text_without(document.root_element(), PAGE_SKIP, &mut text);
    let text = text
        .lines()
        .map(squash)
        .filter(|line| !line.is_empty())
        .join("\n");
    (title, text)
}

/// Final cleanup and quality gate for fetched articles.
#[derive(Debug, Clone)]
pub struct ContentNormalizer {
    min_body_chars: usize,
}

impl ContentNormalizer {
    pub fn new(min_body_chars: usize) -> Self {
        Self { min_body_chars }
    }

    /// Clean every body, drop duplicate URLs (first wins) and drop bodies
    /// shorter than the minimum.
    #[instrument(level = "info", skip_all, fields(input = articles.len()))]
    pub fn normalize(&self, articles: Vec<Article>) -> Vec<Article> {
        let before = articles.len();
        let mut rejected = 0usize;

        let kept: Vec<Article> = articles
            .into_iter()
            .unique_by(|a| a.url.clone())
            .map(|mut article| {
                article.body = clean_text(&article.body);
                article.title = squash(&article.title);
                article
            })
            .filter(|article| {
                let len = article.body_len();
                if len < self.min_body_chars {
                    info!(url = %article.url, len, min = self.min_body_chars, "Body too short; dropping article");
                    rejected += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        debug!(before, kept = kept.len(), rejected, "Normalized articles");
        kept
    }
}
