//! Listing-page and article-page extraction. Ported from a four-strategy
//! fallback chain rather than one-selector-per-site: the original scraper
//! classes differed mainly in which CSS selector happened to work, so this
//! engine tries strategies in order and stops at the first one that yields
//! enough.

use crate::models::Article;
use crate::sources::{is_excluded, looks_like_article_url, SourceAdapter};
use chrono::{DateTime, TimeZone, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const MIN_LISTING_YIELD: usize = 5;
const MIN_CONTENT_LENGTH_FLOOR: usize = 100;

const FINANCE_KEYWORDS: &[&str] = &[
    "bourse",
    "masi",
    "madex",
    "action",
    "dividende",
    "obligation",
    "capitalisation",
    "investissement",
    "taux",
    "inflation",
    "pib",
    "croissance",
    "banque centrale",
    "bank al-maghrib",
    "trésorerie",
    "introduction en bourse",
    "opcvm",
    "rendement",
    "cours",
    "indice",
];

const ICON_SUBSTRINGS: &[&str] = &["icon", "logo", "avatar", "favicon", "sprite"];

const CONTENT_SELECTORS: &[&str] = &[
    ".article-content",
    ".post-content",
    ".entry-content",
    ".article-body",
    ".post-body",
    ".content",
    "[itemprop=\"articleBody\"]",
    ".article-text",
];

/// Tracks which URLs have been scraped recently, surviving process restarts
/// via a JSON side file — the same shape as the cache the original scraper
/// persisted to disk, expressed with `serde_json` instead of a pickle file.
pub struct ScrapedUrlCache {
    path: PathBuf,
    seen: HashMap<String, DateTime<Utc>>,
}

impl ScrapedUrlCache {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let seen = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        ScrapedUrlCache { path, seen }
    }

    pub fn is_recent(&self, url: &str, within: Duration) -> bool {
        match self.seen.get(url) {
            Some(at) => {
                let age = Utc::now().signed_duration_since(*at);
                age.to_std().map(|d| d < within).unwrap_or(false)
            }
            None => false,
        }
    }

    pub fn mark(&mut self, url: &str) {
        self.seen.insert(url.to_string(), Utc::now());
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string(&self.seen)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

pub fn extract_listing(html: &str, base_url: &str, adapter: &SourceAdapter) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut urls = Vec::new();

    strategy_article_tags(&doc, base_url, &mut urls);
    if urls.len() < MIN_LISTING_YIELD {
        strategy_headings(&doc, base_url, &mut urls);
    }
    if urls.len() < MIN_LISTING_YIELD {
        strategy_pattern_links(&doc, base_url, adapter, &mut urls);
    }
    if urls.len() < MIN_LISTING_YIELD {
        strategy_containers(&doc, base_url, &mut urls);
    }

    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for u in urls {
        if is_excluded(&u) {
            continue;
        }
        if seen.insert(u.clone()) {
            out.push(u);
        }
    }
    out
}

fn absolutize(base_url: &str, href: &str) -> Option<String> {
    let base = url::Url::parse(base_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

fn strategy_article_tags(doc: &Html, base_url: &str, out: &mut Vec<String>) {
    let article_sel = Selector::parse("article").unwrap();
    let a_sel = Selector::parse("a[href]").unwrap();
    for article in doc.select(&article_sel) {
        if let Some(a) = article.select(&a_sel).next() {
            if let Some(href) = a.value().attr("href") {
                if let Some(abs) = absolutize(base_url, href) {
                    out.push(abs);
                }
            }
        }
    }
}

fn strategy_headings(doc: &Html, base_url: &str, out: &mut Vec<String>) {
    let heading_sel = Selector::parse("h1,h2,h3,h4,h5").unwrap();
    let a_sel = Selector::parse("a[href]").unwrap();
    for heading in doc.select(&heading_sel) {
        let text = heading.text().collect::<String>();
        if text.trim().len() < 10 {
            continue;
        }
        if let Some(a) = heading.select(&a_sel).next() {
            if let Some(href) = a.value().attr("href") {
                if is_excluded(href) {
                    continue;
                }
                if let Some(abs) = absolutize(base_url, href) {
                    out.push(abs);
                }
            }
        }
    }
}

fn strategy_pattern_links(doc: &Html, base_url: &str, adapter: &SourceAdapter, out: &mut Vec<String>) {
    let a_sel = Selector::parse("a[href]").unwrap();
    for a in doc.select(&a_sel) {
        if let Some(href) = a.value().attr("href") {
            if looks_like_article_url(adapter, href) {
                if let Some(abs) = absolutize(base_url, href) {
                    out.push(abs);
                }
            }
        }
    }
}

fn strategy_containers(doc: &Html, base_url: &str, out: &mut Vec<String>) {
    let container_sel =
        Selector::parse("[class*=\"article\"],[class*=\"post\"],[class*=\"news\"],[class*=\"item\"],[class*=\"card\"],[class*=\"entry\"]")
            .unwrap();
    let a_sel = Selector::parse("a[href][title], a[href]").unwrap();
    for container in doc.select(&container_sel) {
        if let Some(a) = container.select(&a_sel).next() {
            if let Some(href) = a.value().attr("href") {
                if let Some(abs) = absolutize(base_url, href) {
                    out.push(abs);
                }
            }
        }
    }
}

fn text_excluding(el: ElementRef, exclude_selector: &str) -> String {
    let exclude = Selector::parse(exclude_selector).unwrap();
    let excluded: std::collections::HashSet<_> = el.select(&exclude).map(|e| e.id()).collect();

    let mut buf = String::new();
    for node in el.descendants() {
        if let Some(text) = node.value().as_text() {
            let is_in_excluded = node
                .ancestors()
                .any(|anc| excluded.contains(&anc.id()));
            if !is_in_excluded {
                buf.push_str(text);
                buf.push(' ');
            }
        }
    }
    buf.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_content(doc: &Html) -> Option<String> {
    // Strategy 1: <article>
    if let Ok(sel) = Selector::parse("article") {
        if let Some(el) = doc.select(&sel).next() {
            let text = text_excluding(el, "script,style,nav,footer,aside,header,form");
            if text.len() >= MIN_CONTENT_LENGTH_FLOOR {
                return Some(text);
            }
        }
    }

    // Strategy 2: known content-class containers
    for css in CONTENT_SELECTORS {
        if let Ok(sel) = Selector::parse(css) {
            if let Some(el) = doc.select(&sel).next() {
                let text = text_excluding(el, "script,style,nav,footer,aside,header,form");
                if text.len() >= MIN_CONTENT_LENGTH_FLOOR {
                    return Some(text);
                }
            }
        }
    }

    // Strategy 3: concatenation of long paragraphs
    if let Ok(p_sel) = Selector::parse("p") {
        let joined: String = doc
            .select(&p_sel)
            .map(|p| p.text().collect::<String>())
            .filter(|t| t.trim().len() > 100)
            .collect::<Vec<_>>()
            .join("\n\n");
        if joined.len() >= MIN_CONTENT_LENGTH_FLOOR {
            return Some(joined);
        }
    }

    // Strategy 4: <main> or <body> with scaffolding stripped
    for tag in ["main", "body"] {
        if let Ok(sel) = Selector::parse(tag) {
            if let Some(el) = doc.select(&sel).next() {
                let text = text_excluding(el, "script,style,nav,footer,aside,header,form");
                let filtered: String = text
                    .lines()
                    .filter(|l| l.trim().len() > 40)
                    .collect::<Vec<_>>()
                    .join("\n");
                if filtered.len() >= MIN_CONTENT_LENGTH_FLOOR {
                    return Some(filtered);
                }
            }
        }
    }

    None
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_title(doc: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    doc.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_description(doc: &Html) -> Option<String> {
    meta_content(doc, "meta[name=\"description\"]")
        .or_else(|| meta_content(doc, "meta[property=\"og:description\"]"))
}

fn looks_like_icon(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    ICON_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

fn extract_image(doc: &Html, base_url: &str) -> Option<String> {
    let candidate = meta_content(doc, "meta[property=\"og:image\"]")
        .or_else(|| meta_content(doc, "meta[name=\"twitter:image\"]"))
        .or_else(|| {
            let sel = Selector::parse("article img[src]").ok()?;
            doc.select(&sel)
                .filter_map(|el| el.value().attr("src"))
                .find(|src| !looks_like_icon(src))
                .map(|s| s.to_string())
        })
        .or_else(|| {
            let sel = Selector::parse(".content img[src], img[src]").ok()?;
            doc.select(&sel)
                .filter_map(|el| el.value().attr("src"))
                .find(|src| !looks_like_icon(src))
                .map(|s| s.to_string())
        })?;
    absolutize(base_url, &candidate).or(Some(candidate))
}

fn extract_author(doc: &Html) -> Option<String> {
    meta_content(doc, "meta[name=\"author\"]").or_else(|| {
        let sel = Selector::parse("[class*=\"author\" i]").ok()?;
        doc.select(&sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

const FRENCH_MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// Matches `"5 janvier 2026"`-style French long dates anywhere in the page text.
fn parse_french_long_date(text: &str) -> Option<DateTime<Utc>> {
    let re = regex::Regex::new(r"(?i)\b(\d{1,2})\s+([a-zéû]+)\s+(\d{4})\b").ok()?;
    for caps in re.captures_iter(text) {
        let day: u32 = caps.get(1)?.as_str().parse().ok()?;
        let month_name = caps.get(2)?.as_str().to_lowercase();
        let year: i32 = caps.get(3)?.as_str().parse().ok()?;
        if let Some(month) = FRENCH_MONTHS.iter().position(|m| *m == month_name) {
            if let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month as u32 + 1, day) {
                return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
            }
        }
    }
    None
}

/// Matches `"05/01/2026"`-style numeric dates (day/month/year, as used on
/// Moroccan French-language news sites) anywhere in the page text.
fn parse_french_numeric_date(text: &str) -> Option<DateTime<Utc>> {
    let re = regex::Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").ok()?;
    let caps = re.captures(text)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year: i32 = caps.get(3)?.as_str().parse().ok()?;
    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn extract_published_at(doc: &Html) -> Option<DateTime<Utc>> {
    if let Ok(sel) = Selector::parse("time[datetime]") {
        if let Some(raw) = doc.select(&sel).next().and_then(|el| el.value().attr("datetime")) {
            if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
                return Some(dt.with_timezone(&Utc));
            }
        }
    }

    let page_text: String = doc.root_element().text().collect::<Vec<_>>().join(" ");
    parse_french_long_date(&page_text).or_else(|| parse_french_numeric_date(&page_text))
}

fn extract_category(doc: &Html) -> Option<String> {
    meta_content(doc, "meta[property=\"article:section\"]")
}

fn extract_tags(doc: &Html) -> Vec<String> {
    let Ok(sel) = Selector::parse("meta[property=\"article:tag\"]") else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(|s| s.to_string())
        .collect()
}

fn length_bucket(word_count: usize) -> f64 {
    if word_count >= 500 {
        0.40
    } else if word_count >= 300 {
        0.30
    } else if word_count >= 200 {
        0.20
    } else if word_count >= 100 {
        0.10
    } else {
        0.0
    }
}

fn keyword_bucket(content_lower: &str) -> f64 {
    let hits = FINANCE_KEYWORDS
        .iter()
        .filter(|k| content_lower.contains(*k))
        .count();
    if hits >= 5 {
        0.30
    } else if hits >= 3 {
        0.20
    } else if hits >= 1 {
        0.10
    } else {
        0.0
    }
}

fn freshness_bucket(published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match published_at {
        None => 0.0,
        Some(at) => {
            let age_days = (now - at).num_days();
            if age_days <= 0 {
                0.10
            } else if age_days <= 1 {
                0.08
            } else if age_days <= 3 {
                0.05
            } else {
                0.0
            }
        }
    }
}

/// Quality score in `[0,1]` per §4.2's weighted-bucket formula.
pub fn quality_score(
    content: &str,
    has_image: bool,
    has_author: bool,
    has_category: bool,
    has_tags: bool,
    published_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    let word_count = content.split_whitespace().count();
    let content_lower = content.to_ascii_lowercase();

    let length_score = length_bucket(word_count);
    let keyword_score = keyword_bucket(&content_lower);
    let metadata_score = [has_image, has_author, has_category, has_tags]
        .iter()
        .filter(|b| **b)
        .count() as f64
        * 0.05;
    let freshness_score = freshness_bucket(published_at, now);

    (length_score + keyword_score + metadata_score + freshness_score).clamp(0.0, 1.0)
}

pub fn extract_article(
    html: &str,
    url: &str,
    source: &str,
    min_content_length: usize,
) -> Option<Article> {
    let doc = Html::parse_document(html);
    let content = extract_content(&doc)?;
    if content.len() < min_content_length {
        return None;
    }

    let title = extract_title(&doc).unwrap_or_else(|| "".to_string());
    let summary = extract_description(&doc);
    let image_url = extract_image(&doc, url);
    let author = extract_author(&doc);
    let published_at = extract_published_at(&doc);
    let category = extract_category(&doc);
    let tags = extract_tags(&doc);
    let now = Utc::now();

    let quality = quality_score(
        &content,
        image_url.is_some(),
        author.is_some(),
        category.is_some(),
        !tags.is_empty(),
        published_at,
        now,
    );

    if title.is_empty() {
        warn!(url, "extracted article with empty title");
    }

    Some(Article {
        url: url.to_string(),
        source: source.to_string(),
        title,
        summary,
        content,
        image_url,
        published_at,
        scraped_at: now,
        sentiment_score: None,
        sentiment_label: None,
        sentiment_confidence: None,
        quality_score: Some(quality),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SOURCES;

    #[test]
    fn listing_extraction_dedupes_and_excludes() {
        let html = r#"
            <html><body>
            <article><a href="/article/bourse-hausse">Bourse hausse</a></article>
            <article><a href="/article/bourse-hausse">Bourse hausse (dup)</a></article>
            <article><a href="/tag/finance">tag page</a></article>
            </body></html>
        "#;
        let urls = extract_listing(html, "https://example.ma/", &SOURCES[0]);
        assert_eq!(urls.len(), 1);
        assert!(urls[0].ends_with("/article/bourse-hausse"));
    }

    #[test]
    fn quality_score_buckets_accumulate() {
        let long_content = vec!["bourse action dividende taux inflation"; 120].join(" ");
        let now = Utc::now();
        let score = quality_score(&long_content, true, true, true, true, Some(now), now);
        assert!(score > 0.9);

        let short_content = "trop court";
        let score2 = quality_score(short_content, false, false, false, false, None, now);
        assert_eq!(score2, 0.0);
    }

    #[test]
    fn article_extraction_requires_minimum_length() {
        let html = "<html><body><article><p>too short</p></article></body></html>";
        let art = extract_article(html, "https://example.ma/a", "test", 300);
        assert!(art.is_none());
    }

    #[test]
    fn published_at_falls_back_to_french_long_date_without_time_tag() {
        let html = "<html><body><article><p>Publié le 5 janvier 2026 à Casablanca.</p></article></body></html>";
        let doc = Html::parse_document(html);
        let published = extract_published_at(&doc).expect("should find a French long date");
        assert_eq!(published.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
    }

    #[test]
    fn published_at_falls_back_to_french_numeric_date() {
        let html = "<html><body><article><p>Mis à jour le 12/03/2026.</p></article></body></html>";
        let doc = Html::parse_document(html);
        let published = extract_published_at(&doc).expect("should find a numeric date");
        assert_eq!(published.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 3, 12).unwrap());
    }

    #[test]
    fn published_at_prefers_time_tag_over_text_dates() {
        let html = r#"<html><body><time datetime="2026-02-01T00:00:00Z"></time><p>5 janvier 2026</p></body></html>"#;
        let doc = Html::parse_document(html);
        let published = extract_published_at(&doc).expect("should find the time tag date");
        assert_eq!(published.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
    }
}
