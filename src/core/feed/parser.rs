use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use serde::Deserialize;

use super::types::{FeedFormat, FeedSnapshot, Item};

#[derive(Debug, thiserror::Error)]
pub enum FeedParseError {
    #[error("feed payload is empty")]
    EmptyPayload,
    #[error("feed has no title")]
    EmptyTitle,
    #[error("xml feed parse error: {0}")]
    Xml(#[from] feed_rs::parser::ParseFeedError),
    #[error("json feed parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeed {
    title: Option<String>,
    home_page_url: Option<String>,
    description: Option<String>,
    language: Option<String>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonFeedItem {
    title: Option<String>,
    url: Option<String>,
    summary: Option<String>,
    content_text: Option<String>,
    content_html: Option<String>,
    date_published: Option<String>,
}

pub fn parse_feed_bytes(raw: &[u8]) -> Result<FeedSnapshot, FeedParseError> {
    let trimmed = trim_leading_ascii_whitespace(raw);
    if trimmed.is_empty() {
        return Err(FeedParseError::EmptyPayload);
    }
    if trimmed[0] == b'{' {
        return parse_json_feed(trimmed);
    }
    parse_xml_feed(trimmed)
}

fn parse_xml_feed(raw: &[u8]) -> Result<FeedSnapshot, FeedParseError> {
    let feed = feed_rs::parser::parse(raw)?;
    let title = required_title(feed.title.as_ref().map(|text| text.content.as_str()))?;
    let link = feed.links.first().map(|link| link.href.clone());
    let description = feed.description.as_ref().map(|text| text.content.clone());
    let items = feed.entries.iter().map(item_from_xml).collect();

    Ok(FeedSnapshot {
        format: FeedFormat::XmlFeed,
        title,
        description,
        link,
        language: feed.language.clone(),
        items,
    })
}

fn parse_json_feed(raw: &[u8]) -> Result<FeedSnapshot, FeedParseError> {
    let feed: JsonFeed = serde_json::from_slice(raw)?;
    let title = required_title(feed.title.as_deref())?;
    let items = feed
        .items
        .into_iter()
        .map(|item| Item {
            title: item.title.unwrap_or_else(|| "Untitled Entry".to_string()),
            description: item.summary,
            raw_content_body: item.content_html.or(item.content_text),
            link: item.url.unwrap_or_default(),
            published_at: item.date_published.as_deref().and_then(parse_rfc3339),
        })
        .collect();

    Ok(FeedSnapshot {
        format: FeedFormat::JsonFeed,
        title,
        description: feed.description,
        link: feed.home_page_url,
        language: feed.language,
        items,
    })
}

fn item_from_xml(entry: &Entry) -> Item {
    let title = entry
        .title
        .as_ref()
        .map(|text| text.content.clone())
        .unwrap_or_else(|| "Untitled Entry".to_string());
    let link = entry
        .links
        .first()
        .map(|entry_link| entry_link.href.clone())
        .unwrap_or_default();
    let description = entry.summary.as_ref().map(|text| text.content.clone());
    let raw_content_body = entry
        .content
        .as_ref()
        .and_then(|content| content.body.clone());

    Item {
        title,
        description,
        raw_content_body,
        link,
        published_at: entry.published.or(entry.updated),
    }
}

fn required_title(title: Option<&str>) -> Result<String, FeedParseError> {
    match title.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(FeedParseError::EmptyTitle),
    }
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn trim_leading_ascii_whitespace(raw: &[u8]) -> &[u8] {
    let mut index = 0;
    while index < raw.len() && raw[index].is_ascii_whitespace() {
        index += 1;
    }
    &raw[index..]
}
