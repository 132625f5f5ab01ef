//! Shared fixtures: an in-memory media library and an authorized store.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use photo_library_scan::core::auth::{CredentialStore, TokenSet};
use photo_library_scan::core::config::ClientConfig;
use photo_library_scan::core::fetcher::{
    HttpRequest, HttpResponse, HttpTransport, RequestBody, ResilientFetcher, Sleeper, TransportError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const API_BASE: &str = "https://api.test/v1";
pub const PICKER_BASE: &str = "https://api.test/v1/picker";
pub const MEDIA_BASE: &str = "https://media.test/";
pub const PASSPHRASE: &str = "correct horse battery staple";

/// Serves listing pages keyed by cursor and renditions keyed by item id
#[derive(Default)]
pub struct FakeLibrary {
    pages: HashMap<String, String>,
    list_status: Option<u16>,
    images: HashMap<String, Vec<u8>>,
    /// Session polls answered before the selection is set; `None` never sets it
    picker_ready_after: Option<Option<usize>>,
    session_polls: Mutex<usize>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl FakeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page served for `cursor` ("" for the first page)
    pub fn page(mut self, cursor: &str, ids: &[String], next: Option<&str>) -> Self {
        let items: Vec<Value> = ids.iter().map(|id| media_item(id)).collect();
        let mut body = json!({ "mediaItems": items });
        if let Some(next) = next {
            body["nextPageToken"] = Value::String(next.to_string());
        }
        self.pages.insert(cursor.to_string(), body.to_string());
        self
    }

    /// Every listing request fails with `status`
    pub fn failing_with(mut self, status: u16) -> Self {
        self.list_status = Some(status);
        self
    }

    /// Serve a picker session whose selection is set on poll `ready_after`
    pub fn picker_session(mut self, ready_after: Option<usize>) -> Self {
        self.picker_ready_after = Some(ready_after);
        self
    }

    pub fn session_polls(&self) -> usize {
        *self.session_polls.lock().unwrap()
    }

    pub fn image(mut self, id: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(id.to_string(), bytes);
        self
    }

    pub fn listing_requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.starts_with(API_BASE))
            .cloned()
            .collect()
    }

    pub fn download_requests(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.starts_with(MEDIA_BASE))
            .count()
    }

    fn cursor(request: &HttpRequest) -> String {
        match &request.body {
            Some(RequestBody::Json(body)) => body
                .get("pageToken")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => request
                .url
                .split("pageToken=")
                .nth(1)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

impl HttpTransport for FakeLibrary {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(rest) = request.url.strip_prefix(MEDIA_BASE) {
            let id = rest.trim_end_matches("=w256-h256");
            return Ok(match self.images.get(id) {
                Some(bytes) => HttpResponse::new(206, bytes.clone()).with_header("Content-Type", "image/png"),
                None => HttpResponse::new(404, "no such rendition"),
            });
        }
        if let (Some(ready_after), Some(rest)) = (self.picker_ready_after, request.url.strip_prefix(PICKER_BASE)) {
            if rest == "/sessions" {
                return Ok(HttpResponse::new(200, r#"{"id":"s1","pickerUri":"https://picker.test/s1"}"#));
            }
            if rest.starts_with("/sessions/") {
                let mut polls = self.session_polls.lock().unwrap();
                *polls += 1;
                let set = ready_after.is_some_and(|after| *polls >= after);
                return Ok(HttpResponse::new(200, json!({ "id": "s1", "mediaItemsSet": set }).to_string()));
            }
        }
        if let Some(status) = self.list_status {
            return Ok(HttpResponse::new(status, "listing unavailable"));
        }
        Ok(match self.pages.get(&Self::cursor(request)) {
            Some(body) => HttpResponse::new(200, body.clone()),
            None => HttpResponse::new(400, "unknown page token"),
        })
    }
}

/// Never waits
pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

pub fn media_item(id: &str) -> Value {
    json!({
        "id": id,
        "filename": format!("{id}.png"),
        "mimeType": "image/png",
        "baseUrl": format!("{MEDIA_BASE}{id}"),
        "createTime": "2024-01-01T00:00:00Z",
        "mediaMetadata": { "width": "64", "height": "48" },
    })
}

pub fn ids(prefix: &str, range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("{prefix}-{i}")).collect()
}

pub fn client() -> ClientConfig {
    let mut client = ClientConfig::from_lookup(|name| match name {
        "CLIENT_ID" => Some("cid".to_string()),
        "CLIENT_SECRET" => Some("secret".to_string()),
        "REDIRECT_URI" => Some("http://127.0.0.1:8080/callback".to_string()),
        "TOKEN_PASSWORD" => Some(PASSPHRASE.to_string()),
        _ => None,
    })
    .unwrap();
    client.api_base = API_BASE.to_string();
    client.picker_api_base = PICKER_BASE.to_string();
    client
}

pub fn tokens(access: &str) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: Some("r1".to_string()),
        scope: None,
        token_type: Some("Bearer".to_string()),
        expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
    }
}

/// Store with valid tokens for `default`
pub fn authorized_store(dir: &Path, transport: Arc<FakeLibrary>) -> CredentialStore {
    let store = CredentialStore::new(dir.join("tokens"), client(), transport);
    store.store_tokens("default", &tokens("a1")).unwrap();
    store
}

pub fn fetcher(transport: Arc<FakeLibrary>) -> ResilientFetcher {
    ResilientFetcher::new(transport)
        .with_sleeper(Arc::new(NoSleep))
        .with_max_retries(1)
        .with_seed(3)
}

pub fn fixed_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap()
}

/// PNG of a horizontal gradient, bright on the left
pub fn gradient_png() -> Vec<u8> {
    let image = image::RgbImage::from_fn(64, 48, |x, _| {
        let v = 255 - (x * 255 / 63) as u8;
        image::Rgb([v, v, v])
    });
    png(&image)
}

/// PNG of a horizontal gradient, bright on the right
pub fn mirrored_gradient_png() -> Vec<u8> {
    let image = image::RgbImage::from_fn(64, 48, |x, _| {
        let v = (x * 255 / 63) as u8;
        image::Rgb([v, v, v])
    });
    png(&image)
}

fn png(image: &image::RgbImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    bytes.into_inner()
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}
