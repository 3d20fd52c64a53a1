use chrono::{DateTime, Utc};
use url::Url;

use crate::error::FetchError;
use crate::extract;
use crate::schema;

/// Per-field extraction outcome. `Missing` means the markup lacked the
/// expected structure; `Error` means the structure was there but extraction
/// failed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStatus {
    Success,
    Error,
    Missing,
}

impl FieldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldStatus::Success => "success",
            FieldStatus::Error => "error",
            FieldStatus::Missing => "missing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(FieldStatus::Success),
            "error" => Some(FieldStatus::Error),
            "missing" => Some(FieldStatus::Missing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldResult {
    pub name: String,
    pub value: Option<String>,
    pub status: FieldStatus,
}

/// Record-level classification derived from the per-field outcomes:
/// all success / none success / anything in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    Success,
    Partial,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Success => "success",
            ExtractionStatus::Partial => "partial",
            ExtractionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ExtractionStatus::Success),
            "partial" => Some(ExtractionStatus::Partial),
            "failed" => Some(ExtractionStatus::Failed),
            _ => None,
        }
    }
}

/// A candidate item out of a search page. Ephemeral; only its identity
/// survives into the store.
#[derive(Debug, Clone)]
pub struct ItemRef {
    /// Source identifier (9-digit document id); may be empty.
    pub identifier: String,
    pub title: String,
    pub detail_url: String,
}

#[derive(Debug, Clone)]
pub struct Record {
    pub identity: String,
    pub name: String,
    pub fields: Vec<FieldResult>,
    pub status: ExtractionStatus,
    pub source_url: String,
    pub collected_at: DateTime<Utc>,
}

/// Stable dedup key for an item: the source identifier when present,
/// otherwise its normalized detail URL. Same underlying product, same
/// identity, across runs.
pub fn identity_of(item: &ItemRef) -> String {
    let id = item.identifier.trim();
    if !id.is_empty() {
        return id.to_string();
    }
    normalize_url(&item.detail_url)
}

fn normalize_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            let path = url.path().trim_end_matches('/').to_string();
            url.set_path(&path);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

/// Combine an item reference with its fetched markup (or fetch failure)
/// into a Record. A fetch failure yields an all-error record without
/// touching the extractor.
pub fn assemble(item: &ItemRef, markup: Option<&str>, fetch_error: Option<&FetchError>) -> Record {
    let fields = match (markup, fetch_error) {
        (_, Some(e)) => all_error_fields(e),
        (Some(html), None) => extract::extract(html),
        (None, None) => all_error_fields(&FetchError::Permanent("no markup".into())),
    };
    let status = derive_status(&fields);

    let name = fields
        .iter()
        .find(|f| f.name == "name_ko")
        .and_then(|f| f.value.clone())
        .unwrap_or_else(|| item.title.clone());

    Record {
        identity: identity_of(item),
        name,
        fields,
        status,
        source_url: item.detail_url.clone(),
        collected_at: Utc::now(),
    }
}

fn all_error_fields(_cause: &FetchError) -> Vec<FieldResult> {
    schema::SCHEMA
        .iter()
        .map(|rule| FieldResult {
            name: rule.key.to_string(),
            value: None,
            status: FieldStatus::Error,
        })
        .collect()
}

pub fn derive_status(fields: &[FieldResult]) -> ExtractionStatus {
    let ok = fields
        .iter()
        .filter(|f| f.status == FieldStatus::Success)
        .count();
    if ok == fields.len() {
        ExtractionStatus::Success
    } else if ok == 0 {
        ExtractionStatus::Failed
    } else {
        ExtractionStatus::Partial
    }
}

// ── Tests ──
