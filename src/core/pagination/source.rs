//! Page sources: where listing pages come from.

use crate::core::config::DateFilter;
use crate::core::fetcher::{HttpRequest, RequestMetrics, ResilientFetcher, TokenProvider};
use crate::error::FetchError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const ITEM_KEYS: [&str; 3] = ["mediaItems", "items", "media_items"];

/// One page of raw items plus the continuation cursor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_page_token: Option<String>,
}

impl Page {
    /// Extract items and cursor from a listing response body
    pub fn from_response(body: &Value) -> Self {
        let items = ITEM_KEYS
            .iter()
            .find_map(|key| body.get(key).and_then(Value::as_array))
            .cloned()
            .unwrap_or_default();
        let next_page_token = body
            .get("nextPageToken")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        Self {
            items,
            next_page_token,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingMode {
    List,
    Search,
    /// Items selected in a picker session
    Picker,
}

impl ListingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingMode::List => "list",
            ListingMode::Search => "search",
            ListingMode::Picker => "picker",
        }
    }
}

/// Anything that can serve pages by cursor
pub trait PageSource {
    fn mode(&self) -> ListingMode;

    fn fetch_page(&mut self, page_token: Option<&str>, metrics: &mut RequestMetrics) -> Result<Page, FetchError>;
}

/// Pages from the media library API, via the resilient fetcher.
///
/// Without a date filter this lists `GET {api}/mediaItems`; with one it
/// searches `POST {api}/mediaItems:search`.
pub struct MediaLibrarySource<P: TokenProvider> {
    fetcher: ResilientFetcher,
    tokens: P,
    api_base: String,
    page_size: usize,
    date_filter: Option<DateFilter>,
}

impl<P: TokenProvider> MediaLibrarySource<P> {
    pub fn new(fetcher: ResilientFetcher, tokens: P, api_base: impl Into<String>, page_size: usize) -> Self {
        Self {
            fetcher,
            tokens,
            api_base: api_base.into(),
            page_size,
            date_filter: None,
        }
    }

    pub fn with_date_filter(mut self, filter: Option<DateFilter>) -> Self {
        self.date_filter = filter;
        self
    }

    /// Hand back the fetcher and token provider for later stages
    pub fn into_parts(self) -> (ResilientFetcher, P) {
        (self.fetcher, self.tokens)
    }

    fn build_request(&self, page_token: Option<&str>) -> HttpRequest {
        let base = self.api_base.trim_end_matches('/');
        match &self.date_filter {
            None => {
                let mut url = format!("{}/mediaItems?pageSize={}", base, self.page_size);
                if let Some(token) = page_token {
                    url.push_str("&pageToken=");
                    url.push_str(&urlencoding::encode(token));
                }
                HttpRequest::get(url)
            }
            Some(filter) => {
                let mut body = json!({
                    "pageSize": self.page_size,
                    "filters": { "dateFilter": filter.to_json() },
                });
                if let Some(token) = page_token {
                    body["pageToken"] = Value::String(token.to_string());
                }
                HttpRequest::post_json(format!("{}/mediaItems:search", base), body)
            }
        }
    }
}

impl<P: TokenProvider> PageSource for MediaLibrarySource<P> {
    fn mode(&self) -> ListingMode {
        if self.date_filter.is_some() {
            ListingMode::Search
        } else {
            ListingMode::List
        }
    }

    fn fetch_page(&mut self, page_token: Option<&str>, metrics: &mut RequestMetrics) -> Result<Page, FetchError> {
        let request = self.build_request(page_token);
        let body = self.fetcher.request_json(&request, &mut self.tokens, metrics)?;
        Ok(Page::from_response(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetcher::testing::{RecordingSleeper, ScriptedTransport};
    use crate::core::fetcher::{HttpResponse, Method, RequestBody, StaticToken};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn source(transport: Arc<ScriptedTransport>) -> MediaLibrarySource<StaticToken> {
        let fetcher = ResilientFetcher::new(transport).with_sleeper(Arc::new(RecordingSleeper::default()));
        MediaLibrarySource::new(fetcher, StaticToken("t".to_string()), "https://api.test/v1", 100)
    }

    #[test]
    fn list_mode_passes_cursor_in_query() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(
            200,
            r#"{"mediaItems":[{"id":"1"},{"id":"2"}],"nextPageToken":"p2"}"#,
        ))]);
        let mut source = source(transport.clone());

        let page = source.fetch_page(Some("p1"), &mut RequestMetrics::new()).unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
        let sent = &transport.requests.lock().unwrap()[0];
        assert_eq!(sent.method, Method::Get);
        assert_eq!(sent.url, "https://api.test/v1/mediaItems?pageSize=100&pageToken=p1");
        assert_eq!(source.mode(), ListingMode::List);
    }

    #[test]
    fn search_mode_posts_date_filter() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(200, "{}"))]);
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let filter = DateFilter::since("2024-01-15", today).unwrap();
        let mut source = source(transport.clone()).with_date_filter(Some(filter));

        let page = source.fetch_page(None, &mut RequestMetrics::new()).unwrap();

        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
        let sent = &transport.requests.lock().unwrap()[0];
        assert!(sent.url.ends_with("/mediaItems:search"));
        match &sent.body {
            Some(RequestBody::Json(body)) => {
                assert_eq!(body["pageSize"], 100);
                assert_eq!(body["filters"]["dateFilter"]["ranges"][0]["startDate"]["day"], 15);
                assert!(body.get("pageToken").is_none());
            }
            other => panic!("expected JSON body, got {:?}", other),
        }
    }

    #[test]
    fn alternate_item_keys_and_empty_cursor() {
        let page = Page::from_response(&serde_json::json!({
            "items": [{ "id": "x" }],
            "nextPageToken": ""
        }));
        assert_eq!(page.items.len(), 1);
        assert!(page.next_page_token.is_none());
    }
}
