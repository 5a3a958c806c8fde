use std::time::Duration;

use chrono::Utc;
use feed_rs::parser;
use regex::Regex;
use reqwest::Client;

use crate::error::Result;
use crate::models::{NewItem, ParsedFeed};
use crate::util::{collapse_whitespace, truncate_chars};

use super::FeedSource;

const DESCRIPTION_MAX_CHARS: usize = 5000;

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("storystream/0.1")
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        let feed = parser::parse(&bytes[..])?;

        let title = feed
            .title
            .map(|t| t.content)
            .or_else(|| feed.links.first().map(|l| l.href.clone()))
            .unwrap_or_else(|| url.to_string());

        let items: Vec<NewItem> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let link = entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .unwrap_or_else(|| entry.id.clone());
                let guid = if entry.id.is_empty() { link.clone() } else { entry.id.clone() };
                if guid.is_empty() {
                    return None;
                }

                let content_html = entry
                    .summary
                    .as_ref()
                    .map(|s| s.content.clone())
                    .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
                    .unwrap_or_default();
                let description = html2text::from_read(content_html.as_bytes(), 80)
                    .map(|t| collapse_whitespace(&t))
                    .unwrap_or_default();
                let description = truncate_chars(&description, DESCRIPTION_MAX_CHARS).to_string();

                let thumbnail_url = extract_thumbnail(&entry, &link);

                Some(NewItem {
                    guid,
                    link,
                    title: entry.title.map(|t| t.content).unwrap_or_default(),
                    description,
                    topic: "general".to_string(),
                    published_at: entry.published.or(entry.updated).unwrap_or_else(Utc::now),
                    thumbnail_url,
                })
            })
            .collect();

        Ok(ParsedFeed { title, items })
    }
}

impl FeedSource for FeedFetcher {
    async fn fetch_and_parse(&self, url: &str) -> Result<ParsedFeed> {
        self.fetch(url).await
    }
}

impl Default for FeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick a thumbnail from feed-level metadata: media thumbnails, image media
/// content, image enclosure links, then the first <img> in the entry HTML.
/// Scraping the linked page itself is out of scope here.
fn extract_thumbnail(entry: &feed_rs::model::Entry, base_link: &str) -> Option<String> {
    for media in &entry.media {
        if let Some(thumb) = media.thumbnails.first() {
            if let Some(url) = clean_thumbnail_url(&thumb.image.uri) {
                return Some(url);
            }
        }
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .map(|ct| ct.to_string().starts_with("image/"))
                .unwrap_or(false);
            if let Some(url) = content.url.as_ref() {
                let url = url.to_string();
                if is_image || looks_like_image_url(&url) {
                    if let Some(url) = clean_thumbnail_url(&url) {
                        return Some(url);
                    }
                }
            }
        }
    }

    for link in &entry.links {
        let rel = link.rel.as_deref().unwrap_or("");
        let media_type = link.media_type.as_deref().unwrap_or("");
        if rel.contains("enclosure")
            && (media_type.starts_with("image/")
                || (media_type.is_empty() && looks_like_image_url(&link.href)))
        {
            if let Some(url) = clean_thumbnail_url(&link.href) {
                return Some(url);
            }
        }
    }

    let html = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .unwrap_or_default();
    first_image_from_html(&html).map(|url| resolve_url(&url, base_link))
}

fn looks_like_image_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split('?').next().unwrap_or(&lower);
    [".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// Reject data URLs and obvious tracking pixels.
fn clean_thumbnail_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() || url.starts_with("data:") {
        return None;
    }
    let lower = url.to_lowercase();
    const TRACKING: &[&str] = &[
        "pixel",
        "tracking",
        "analytics",
        "1x1",
        "spacer",
        "blank.gif",
        "blank.png",
    ];
    if TRACKING.iter().any(|t| lower.contains(t)) {
        return None;
    }
    Some(url.to_string())
}

fn first_image_from_html(html: &str) -> Option<String> {
    if html.is_empty() {
        return None;
    }
    let img_re = Regex::new(r#"<img[^>]+src=["']([^"']+)["']"#).ok()?;
    let result = img_re
        .captures_iter(html)
        .filter_map(|cap| cap.get(1))
        .find_map(|m| clean_thumbnail_url(m.as_str()));
    result
}

/// Resolve a potentially relative URL against the article link so thumbnails
/// work when a feed uses relative paths.
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tracking_and_data_urls() {
        assert!(clean_thumbnail_url("data:image/gif;base64,xyz").is_none());
        assert!(clean_thumbnail_url("https://x.test/pixel.gif").is_none());
        assert!(clean_thumbnail_url("https://x.test/photo.jpg").is_some());
    }

    #[test]
    fn finds_first_usable_img() {
        let html = r#"<p>hi</p><img src="https://t.test/1x1.png"><img src='https://t.test/cover.jpg'>"#;
        assert_eq!(
            first_image_from_html(html).as_deref(),
            Some("https://t.test/cover.jpg")
        );
    }

    #[test]
    fn resolves_relative_thumbnails() {
        assert_eq!(
            resolve_url("/img/a.png", "https://site.test/posts/1"),
            "https://site.test/img/a.png"
        );
        assert_eq!(
            resolve_url("https://cdn.test/a.png", "https://site.test/"),
            "https://cdn.test/a.png"
        );
    }

    #[test]
    fn image_url_extension_check_ignores_query() {
        assert!(looks_like_image_url("https://x.test/a.jpeg?w=600"));
        assert!(!looks_like_image_url("https://x.test/a.html"));
    }
}
