use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A feed URL found in an import payload, with the title the payload gave it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportCandidate {
    pub feed_url: String,
    pub title_hint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportPreview {
    pub new_sources: Vec<ImportCandidate>,
    pub duplicate_sources: Vec<ImportCandidate>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("invalid OPML content: {0}")]
    Opml(String),
    #[error("invalid JSON import format: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported import format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Opml,
    UrlList,
    Json,
}

impl FromStr for ImportFormat {
    type Err = ImportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "opml" | "xml" => Ok(ImportFormat::Opml),
            "url_list" | "urls" | "txt" => Ok(ImportFormat::UrlList),
            "json" | "json_list" => Ok(ImportFormat::Json),
            unsupported => Err(ImportError::UnsupportedFormat(unsupported.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum JsonImportItem {
    Url(String),
    Object {
        feed_url: String,
        title: Option<String>,
    },
}

pub fn parse_candidates(format: ImportFormat, content: &str) -> Result<Vec<ImportCandidate>, ImportError> {
    match format {
        ImportFormat::Opml => parse_opml(content),
        ImportFormat::UrlList => Ok(parse_url_list(content)),
        ImportFormat::Json => parse_json_sources(content),
    }
}

pub fn parse_opml(opml_content: &str) -> Result<Vec<ImportCandidate>, ImportError> {
    let doc = roxmltree::Document::parse(opml_content)
        .map_err(|error| ImportError::Opml(error.to_string()))?;

    let candidates = doc
        .descendants()
        .filter(|node| node.has_tag_name("outline"))
        .filter_map(|node| {
            let feed_url = node.attribute("xmlUrl")?.trim();
            if feed_url.is_empty() {
                return None;
            }
            let title_hint = node
                .attribute("title")
                .or_else(|| node.attribute("text"))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string);
            Some(ImportCandidate {
                feed_url: feed_url.to_string(),
                title_hint,
            })
        })
        .collect();

    Ok(candidates)
}

pub fn parse_url_list(input: &str) -> Vec<ImportCandidate> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(|line| ImportCandidate {
            feed_url: line.to_string(),
            title_hint: None,
        })
        .collect()
}

pub fn parse_json_sources(input: &str) -> Result<Vec<ImportCandidate>, ImportError> {
    let items: Vec<JsonImportItem> = serde_json::from_str(input)?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            JsonImportItem::Url(feed_url) => ImportCandidate {
                feed_url,
                title_hint: None,
            },
            JsonImportItem::Object { feed_url, title } => ImportCandidate {
                feed_url,
                title_hint: title,
            },
        })
        .collect())
}

/// Splits candidates into new ones and ones that repeat an existing URL or an
/// earlier candidate. The first occurrence of a repeated URL stays new.
pub fn build_import_preview(
    candidates: Vec<ImportCandidate>,
    existing_feed_urls: &HashSet<String>,
) -> ImportPreview {
    let mut seen = HashSet::new();
    let mut preview = ImportPreview::default();

    for candidate in candidates {
        let normalized = normalize_url(&candidate.feed_url);
        if normalized.is_empty() {
            continue;
        }
        if existing_feed_urls.contains(&normalized) || !seen.insert(normalized) {
            preview.duplicate_sources.push(candidate);
            continue;
        }
        preview.new_sources.push(candidate);
    }

    preview
}

pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}
