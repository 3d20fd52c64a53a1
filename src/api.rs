use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::FetchError;
use crate::record::ItemRef;

const SEARCH_URL: &str = "https://openapi.naver.com/v1/search/encyc.json";
const DETAIL_URL_PREFIX: &str = "https://terms.naver.com/entry.naver?docId=";
const USER_AGENT: &str = "medicollect/0.1";
/// The search service rejects offsets past this point.
const MAX_START: u64 = 1000;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<]+?>").unwrap());
static DOC_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]{9})").unwrap());
static DOSAGE_FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(정|캡슐|연고|주사|시럽|액|산|주|정제|과립|크림|로션|패치|스프레이)$").unwrap()
});

/// Markers that identify a search hit as a medicine entry when the title
/// suffix alone is inconclusive.
const MEDICINE_MARKERS: &[&str] = &[
    "전문의약품",
    "일반의약품",
    "소화성궤양용제",
    "항생제",
    "진통제",
    "효능효과",
    "용법용량",
    "사용상주의사항",
    "분류",
    "성상",
    "제형",
];

/// One page of search results plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub items: Vec<ItemRef>,
    pub next_cursor: Option<String>,
}

/// Keyword search boundary: one page of candidate item references per call.
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, keyword: &str, cursor: Option<&str>) -> Result<SearchPage, FetchError>;
}

/// Detail-page markup fetch boundary.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Naver encyclopedia search client; also fetches detail pages.
pub struct NaverClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    page_size: u32,
}

impl NaverClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Permanent(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            page_size: config.page_size,
        })
    }
}

#[async_trait]
impl SearchApi for NaverClient {
    async fn search(&self, keyword: &str, cursor: Option<&str>) -> Result<SearchPage, FetchError> {
        let start = parse_cursor(cursor)?;
        debug!("searching '{}' from offset {}", keyword, start);

        let resp = self
            .http
            .get(SEARCH_URL)
            .header("X-Naver-Client-Id", &self.client_id)
            .header("X-Naver-Client-Secret", &self.client_secret)
            .query(&[
                ("query", keyword),
                ("display", &self.page_size.to_string()),
                ("start", &start.to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), "search"));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Permanent(format!("search response decode: {e}")))?;

        let items = parse_items(&body);
        let total = body.get("total").and_then(|t| t.as_u64()).unwrap_or(0);
        let next_cursor = next_cursor(start, self.page_size, total);
        info!("'{}': {} medicine candidates at offset {}", keyword, items.len(), start);

        Ok(SearchPage { items, next_cursor })
    }
}

#[async_trait]
impl PageFetcher for NaverClient {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), "detail fetch"));
        }
        resp.text()
            .await
            .map_err(|e| FetchError::Transient(format!("detail body read: {e}")))
    }
}

fn parse_cursor(cursor: Option<&str>) -> Result<u64, FetchError> {
    match cursor {
        None => Ok(1),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| FetchError::Permanent(format!("malformed cursor '{raw}'"))),
    }
}

fn next_cursor(start: u64, page_size: u32, total: u64) -> Option<String> {
    let next = start + page_size as u64;
    if next <= total && next <= MAX_START {
        Some(next.to_string())
    } else {
        None
    }
}

/// Pull medicine candidates out of a search response body. Non-medicine
/// hits and hits without a usable identity are dropped.
pub fn parse_items(body: &serde_json::Value) -> Vec<ItemRef> {
    let Some(items) = body.get("items").and_then(|i| i.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let title = strip_tags(item.get("title").and_then(|t| t.as_str()).unwrap_or(""));
            let description =
                strip_tags(item.get("description").and_then(|d| d.as_str()).unwrap_or(""));
            let link = item.get("link").and_then(|l| l.as_str()).unwrap_or("");

            if title.is_empty() || link.is_empty() {
                return None;
            }
            if !is_medicine_entry(&title, &description) {
                return None;
            }

            let identifier = DOC_ID_RE
                .captures(link)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            let detail_url = if identifier.is_empty() {
                link.to_string()
            } else {
                format!("{DETAIL_URL_PREFIX}{identifier}")
            };

            Some(ItemRef {
                identifier,
                title,
                detail_url,
            })
        })
        .collect()
}

fn strip_tags(raw: &str) -> String {
    TAG_RE.replace_all(raw, "").trim().to_string()
}

fn is_medicine_entry(title: &str, description: &str) -> bool {
    if DOSAGE_FORM_RE.is_match(title) {
        return true;
    }
    MEDICINE_MARKERS.iter().any(|m| description.contains(m))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dosage_form_suffixes_match() {
        assert!(is_medicine_entry("가스트릴정", ""));
        assert!(is_medicine_entry("아목시실린캡슐", ""));
        assert!(is_medicine_entry("케토톱패치", ""));
        assert!(!is_medicine_entry("위염", "건강 정보"));
    }

    #[test]
    fn description_markers_match() {
        assert!(is_medicine_entry("라베카", "전문의약품으로 분류된다"));
        assert!(!is_medicine_entry("라베카", "역사적 배경"));
    }

    #[test]
    fn parse_items_filters_and_extracts_ids() {
        let body = serde_json::json!({
            "total": 250,
            "items": [
                {
                    "title": "<b>가스트릴</b>정",
                    "description": "일반의약품",
                    "link": "https://terms.naver.com/entry.naver?docId=123456789&cid=51000"
                },
                {
                    "title": "소화불량",
                    "description": "증상에 대한 설명",
                    "link": "https://terms.naver.com/entry.naver?docId=222333444"
                },
                {
                    "title": "낙센정",
                    "description": "진통제",
                    "link": "https://terms.naver.com/some/other/page"
                }
            ]
        });
        let items = parse_items(&body);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].identifier, "123456789");
        assert_eq!(items[0].title, "가스트릴정");
        assert_eq!(
            items[0].detail_url,
            "https://terms.naver.com/entry.naver?docId=123456789"
        );
        // No doc id in the link: identity falls back to the URL itself.
        assert_eq!(items[1].identifier, "");
        assert_eq!(items[1].detail_url, "https://terms.naver.com/some/other/page");
    }

    #[test]
    fn one_client_serves_both_boundaries() {
        let config = Config {
            client_id: "id".into(),
            client_secret: "secret".into(),
            ..Config::default()
        };
        let client = std::sync::Arc::new(NaverClient::new(&config).unwrap());
        let _search: std::sync::Arc<dyn SearchApi> = client.clone();
        let _fetcher: std::sync::Arc<dyn PageFetcher> = client;
    }

    #[test]
    fn cursor_progression_respects_total_and_cap() {
        assert_eq!(next_cursor(1, 100, 250), Some("101".to_string()));
        assert_eq!(next_cursor(201, 100, 250), None);
        assert_eq!(next_cursor(901, 100, 100_000), None); // service cap
        assert_eq!(parse_cursor(None).unwrap(), 1);
        assert_eq!(parse_cursor(Some("101")).unwrap(), 101);
        assert!(parse_cursor(Some("abc")).is_err());
    }
}
