//! Generic remoteStorage HTTP adapter.
//!
//! [`WireRemote`] maps [`Remote`] calls onto plain HTTP requests with
//! bearer authorization and ETag-based conditional headers, and maps the
//! responses back:
//!
//! | Status | Result |
//! |---|---|
//! | 401, 403, 404, 412 | status and revision only |
//! | 201, 204, 304, or 200 on PUT/DELETE | status and revision only |
//! | anything else | status, parsed body, content type, revision |
//!
//! Folder GETs additionally turn the JSON body into a [`FolderListing`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use remstore_node::{is_folder, Body, ProtocolVersion};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{RemoteError, RemoteResult};
use crate::http::{HttpClient, HttpRequest, HttpResponse, Method};
use crate::listing::{FolderListing, ItemMeta};
use crate::remote::{Remote, RemoteContent, RemoteResponse, RequestOptions};

/// Default per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// `@context` value of a draft-02 folder description.
pub const FOLDER_DESCRIPTION_CONTEXT: &str = "http://remotestorage.io/spec/folder-description";

#[derive(Debug, Default, Clone)]
struct WireSettings {
    href: Option<String>,
    token: Option<String>,
    protocol: ProtocolVersion,
}

/// HTTP remoteStorage adapter.
pub struct WireRemote<C: HttpClient> {
    client: C,
    settings: RwLock<WireSettings>,
    connected: AtomicBool,
    online: AtomicBool,
    timeout: Duration,
    /// Revision tags learned from listings, for servers without ETags.
    revision_cache: RwLock<HashMap<String, String>>,
}

impl<C: HttpClient> WireRemote<C> {
    /// Creates an unconfigured adapter.
    pub fn new(client: C) -> Self {
        Self {
            client,
            settings: RwLock::new(WireSettings::default()),
            connected: AtomicBool::new(false),
            online: AtomicBool::new(true),
            timeout: REQUEST_TIMEOUT,
            revision_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Updates the storage address, bearer token and storage API.
    ///
    /// `None` leaves a setting unchanged. The adapter is connected once
    /// both an address and a token are known.
    pub fn configure(&self, href: Option<&str>, token: Option<&str>, storage_api: Option<&str>) {
        let connected = {
            let mut settings = self.settings.write();
            if let Some(href) = href {
                settings.href = Some(href.to_string());
            }
            if let Some(token) = token {
                settings.token = Some(token.to_string());
            }
            if let Some(api) = storage_api {
                settings.protocol = ProtocolVersion::from_storage_api(api);
            }
            settings.href.is_some() && settings.token.is_some()
        };
        self.connected.store(connected, Ordering::SeqCst);
        if connected {
            self.online.store(true, Ordering::SeqCst);
        }
        debug!(connected, "wire remote configured");
    }

    /// Forgets the token, disconnecting the adapter.
    pub fn disconnect(&self) {
        self.settings.write().token = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Returns the storage address.
    pub fn href(&self) -> Option<String> {
        self.settings.read().href.clone()
    }

    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        mut headers: Vec<(String, String)>,
        body: Option<Vec<u8>>,
    ) -> RemoteResult<RemoteResponse> {
        if method != Method::Get && is_folder(path) {
            return Err(RemoteError::InvalidRequest(format!(
                "cannot {method} a folder: {path}"
            )));
        }
        let settings = self.settings.read().clone();
        let (Some(href), Some(token), true) = (settings.href, settings.token, self.connected())
        else {
            return Err(RemoteError::NotConnected);
        };
        let url = storage_url(&href, path)?;
        headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        debug!(%method, %url, "remote request");

        let request = HttpRequest {
            method,
            url: url.into(),
            headers,
            body,
        };
        let response = match tokio::time::timeout(self.timeout, self.client.send(request)).await {
            Err(_) => {
                self.set_online(false);
                warn!(%method, path, "remote request timed out");
                return Err(RemoteError::Timeout {
                    millis: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            Ok(Err(message)) => {
                self.set_online(false);
                warn!(%method, path, error = %message, "remote request failed");
                return Err(RemoteError::transport(message));
            }
            Ok(Ok(response)) => response,
        };
        self.set_online(true);

        let cached = self.revision_cache.read().get(path).cloned();
        interpret_response(
            method,
            &response,
            settings.protocol.supports_revisions(),
            cached,
        )
    }

    fn conditional_headers(&self, options: &RequestOptions) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if !self.protocol().supports_revisions() {
            return headers;
        }
        if let Some(rev) = &options.if_match {
            headers.push(("If-Match".to_string(), add_quotes(rev)));
        }
        if let Some(rev) = &options.if_none_match {
            headers.push(("If-None-Match".to_string(), add_quotes(rev)));
        }
        headers
    }

    fn folder_response(&self, path: &str, mut response: RemoteResponse) -> RemoteResponse {
        if response.status != 200 {
            return response;
        }
        let Some(RemoteContent::Document(Body::Json(Value::Object(object)))) = &response.content
        else {
            return response;
        };
        if object.is_empty() {
            response.status = 404;
            response.content = None;
            return response;
        }
        let entries = match object.get("items") {
            Some(Value::Object(items))
                if object.get("@context").and_then(Value::as_str)
                    == Some(FOLDER_DESCRIPTION_CONTEXT) =>
            {
                items
            }
            _ => object,
        };
        let listing: FolderListing = entries
            .iter()
            .map(|(name, value)| (name.clone(), item_meta(value)))
            .collect();
        {
            let mut cache = self.revision_cache.write();
            for (name, meta) in &listing {
                if let Some(etag) = &meta.etag {
                    cache.insert(format!("{path}{name}"), etag.clone());
                }
            }
        }
        response.content = Some(RemoteContent::Listing(listing));
        response
    }
}

#[async_trait]
impl<C: HttpClient> Remote for WireRemote<C> {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn protocol(&self) -> ProtocolVersion {
        self.settings.read().protocol
    }

    async fn get(&self, path: &str, options: RequestOptions) -> RemoteResult<RemoteResponse> {
        let headers = RequestOptions {
            if_match: None,
            ..options
        };
        let headers = self.conditional_headers(&headers);
        let response = self.request(Method::Get, path, headers, None).await?;
        if is_folder(path) {
            Ok(self.folder_response(path, response))
        } else {
            Ok(response)
        }
    }

    async fn put(
        &self,
        path: &str,
        body: Body,
        content_type: Option<String>,
        options: RequestOptions,
    ) -> RemoteResult<RemoteResponse> {
        let bytes = body.to_bytes().ok_or_else(|| {
            RemoteError::InvalidRequest(format!("cannot upload a tombstone: {path}"))
        })?;
        let mut headers = vec![(
            "Content-Type".to_string(),
            with_charset(content_type.as_deref(), &body),
        )];
        headers.extend(self.conditional_headers(&options));
        self.request(Method::Put, path, headers, Some(bytes)).await
    }

    async fn delete(&self, path: &str, options: RequestOptions) -> RemoteResult<RemoteResponse> {
        let headers = RequestOptions {
            if_none_match: None,
            ..options
        };
        let headers = self.conditional_headers(&headers);
        self.request(Method::Delete, path, headers, None).await
    }
}

impl<C: HttpClient> std::fmt::Debug for WireRemote<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireRemote")
            .field("href", &self.href())
            .field("protocol", &self.protocol())
            .field("connected", &self.connected())
            .field("online", &self.online())
            .finish()
    }
}

/// Builds the request URL for `path` under `href`.
///
/// Repeated separators collapse and every segment is percent-encoded.
fn storage_url(href: &str, path: &str) -> RemoteResult<Url> {
    let mut url = Url::parse(href)
        .map_err(|e| RemoteError::InvalidRequest(format!("invalid storage address {href}: {e}")))?;
    {
        let mut segments = url.path_segments_mut().map_err(|()| {
            RemoteError::InvalidRequest(format!("storage address {href} cannot hold paths"))
        })?;
        segments.pop_if_empty();
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        if is_folder(path) {
            segments.push("");
        }
    }
    Ok(url)
}

fn add_quotes(revision: &str) -> String {
    if revision == "*" {
        revision.to_string()
    } else {
        format!("\"{revision}\"")
    }
}

fn strip_quotes(value: &str) -> String {
    let value = value.strip_prefix(['"', '\'']).unwrap_or(value);
    value.strip_suffix(['"', '\'']).unwrap_or(value).to_string()
}

fn is_json(content_type: &str) -> bool {
    content_type.starts_with("application/json") || content_type.starts_with("application/ld+json")
}

fn with_charset(content_type: Option<&str>, body: &Body) -> String {
    let base = content_type.map(str::to_string).unwrap_or_else(|| match body {
        Body::Json(_) => "application/json".to_string(),
        Body::Binary(_) => "application/octet-stream".to_string(),
        _ => "text/plain".to_string(),
    });
    if base.contains("charset=") {
        base
    } else {
        let charset = if matches!(body, Body::Binary(_)) {
            "binary"
        } else {
            "utf-8"
        };
        format!("{base}; charset={charset}")
    }
}

fn item_meta(value: &Value) -> ItemMeta {
    match value {
        Value::String(etag) => ItemMeta::with_etag(etag.clone()),
        Value::Object(fields) => ItemMeta {
            etag: fields.get("ETag").and_then(Value::as_str).map(str::to_string),
            content_type: fields
                .get("Content-Type")
                .and_then(Value::as_str)
                .map(str::to_string),
            content_length: fields.get("Content-Length").and_then(Value::as_u64),
        },
        _ => ItemMeta::default(),
    }
}

/// Turns an HTTP response into a [`RemoteResponse`].
///
/// `cached_revision` stands in for the ETag on a 200 when the server
/// does not support revisions.
fn interpret_response(
    method: Method,
    response: &HttpResponse,
    supports_revisions: bool,
    cached_revision: Option<String>,
) -> RemoteResult<RemoteResponse> {
    let status = response.status;
    let etag = response.header("ETag").map(strip_quotes);
    let revision = if supports_revisions {
        etag.clone()
    } else if status == 200 {
        cached_revision
    } else {
        None
    };

    if matches!(status, 401 | 403 | 404 | 412) {
        return Ok(RemoteResponse::status(status).with_revision(revision));
    }
    if matches!(status, 201 | 204 | 304) || (status == 200 && method != Method::Get) {
        return Ok(RemoteResponse::status(status).with_revision(etag));
    }

    let content_type = response.header("Content-Type").map(str::to_string);
    let body = match content_type.as_deref() {
        None => Body::Binary(response.body.clone()),
        Some(ct) if ct.contains("charset=binary") => Body::Binary(response.body.clone()),
        Some(ct) if is_json(ct) => {
            let value = serde_json::from_slice(&response.body)
                .map_err(|e| RemoteError::Protocol(format!("invalid JSON body: {e}")))?;
            Body::Json(value)
        }
        Some(_) => match String::from_utf8(response.body.clone()) {
            Ok(text) => Body::Text(text),
            Err(e) => Body::Binary(e.into_bytes()),
        },
    };
    Ok(RemoteResponse::status(status)
        .with_document(body, content_type)
        .with_revision(revision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        fn reply(&self, response: HttpResponse) {
            self.responses.lock().push_back(Ok(response));
        }

        fn fail(&self, message: &str) {
            self.responses.lock().push_back(Err(message.to_string()));
        }

        fn last(&self) -> HttpRequest {
            self.requests.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted response".into()))
        }
    }

    fn remote(api: &str) -> WireRemote<ScriptedClient> {
        let remote = WireRemote::new(ScriptedClient::default());
        remote.configure(
            Some("https://storage.example.com/bob"),
            Some("TOKEN"),
            Some(api),
        );
        remote
    }

    const DRAFT_02: &str = "draft-dejong-remotestorage-02";
    const API_2012: &str = "https://www.w3.org/community/rww/wiki/read-write-web-00#simple";

    #[test]
    fn configure_connects_with_href_and_token() {
        let remote = WireRemote::new(ScriptedClient::default());
        assert!(!remote.connected());
        remote.configure(Some("https://x.example/"), None, None);
        assert!(!remote.connected());
        remote.configure(None, Some("t"), Some(DRAFT_02));
        assert!(remote.connected());
        assert!(remote.online());
        assert_eq!(remote.protocol(), ProtocolVersion::Draft02);
        remote.disconnect();
        assert!(!remote.connected());
    }

    #[test]
    fn urls_collapse_and_encode() {
        let url = storage_url("https://s.example/bob/", "/a//b c/d").unwrap();
        assert_eq!(url.as_str(), "https://s.example/bob/a/b%20c/d");
        let url = storage_url("https://s.example/bob", "/a/").unwrap();
        assert_eq!(url.as_str(), "https://s.example/bob/a/");
        let url = storage_url("https://s.example/bob", "/").unwrap();
        assert_eq!(url.as_str(), "https://s.example/bob/");
    }

    #[test]
    fn quoting() {
        assert_eq!(add_quotes("abc"), "\"abc\"");
        assert_eq!(add_quotes("*"), "*");
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("abc"), "abc");
    }

    #[tokio::test]
    async fn put_sends_auth_conditions_and_charset() {
        let remote = remote(DRAFT_02);
        remote
            .client
            .reply(HttpResponse::new(201).with_header("ETag", "\"abc\""));
        let response = remote
            .put(
                "/foo/bar",
                Body::from("hello"),
                Some("text/plain".into()),
                RequestOptions::create_only(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.revision.as_deref(), Some("abc"));

        let request = remote.client.last();
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.url, "https://storage.example.com/bob/foo/bar");
        assert_eq!(request.header("Authorization"), Some("Bearer TOKEN"));
        assert_eq!(request.header("If-None-Match"), Some("*"));
        assert_eq!(
            request.header("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(request.body.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn binary_put_gets_binary_charset() {
        let remote = remote(DRAFT_02);
        remote.client.reply(HttpResponse::new(200));
        remote
            .put(
                "/img",
                Body::Binary(vec![1, 2]),
                Some("image/png".into()),
                RequestOptions::if_match("r1"),
            )
            .await
            .unwrap();
        let request = remote.client.last();
        assert_eq!(
            request.header("Content-Type"),
            Some("image/png; charset=binary")
        );
        assert_eq!(request.header("If-Match"), Some("\"r1\""));
    }

    #[tokio::test]
    async fn no_conditional_headers_without_revisions() {
        let remote = remote(API_2012);
        remote.client.reply(HttpResponse::new(200));
        remote
            .delete("/a", RequestOptions::if_match("r1"))
            .await
            .unwrap();
        assert_eq!(remote.client.last().header("If-Match"), None);
    }

    #[tokio::test]
    async fn folders_cannot_be_written() {
        let remote = remote(DRAFT_02);
        let err = remote
            .delete("/a/", RequestOptions::none())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidRequest(_)));
        let err = remote
            .put("/a/", Body::from("x"), None, RequestOptions::none())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn not_connected() {
        let remote = WireRemote::new(ScriptedClient::default());
        let err = remote.get("/a", RequestOptions::none()).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotConnected));
    }

    #[tokio::test]
    async fn transport_failure_goes_offline() {
        let remote = remote(DRAFT_02);
        remote.client.fail("connection refused");
        let err = remote.get("/a", RequestOptions::none()).await.unwrap_err();
        assert!(err.is_network());
        assert!(!remote.online());

        remote.client.reply(HttpResponse::new(404));
        let response = remote.get("/a", RequestOptions::none()).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(remote.online());
    }

    #[tokio::test]
    async fn document_bodies_by_content_type() {
        let remote = remote(DRAFT_02);
        remote.client.reply(
            HttpResponse::new(200)
                .with_header("Content-Type", "application/json; charset=utf-8")
                .with_header("ETag", "\"j1\"")
                .with_body(br#"{"a":1}"#.to_vec()),
        );
        let response = remote
            .get("/doc", RequestOptions::if_none_match("j0"))
            .await
            .unwrap();
        assert_eq!(response.body(), Some(&Body::Json(serde_json::json!({"a": 1}))));
        assert_eq!(response.revision.as_deref(), Some("j1"));
        assert_eq!(remote.client.last().header("If-None-Match"), Some("\"j0\""));

        remote.client.reply(
            HttpResponse::new(200)
                .with_header("Content-Type", "text/plain")
                .with_body(b"hi".to_vec()),
        );
        let response = remote.get("/txt", RequestOptions::none()).await.unwrap();
        assert_eq!(response.body(), Some(&Body::from("hi")));

        remote
            .client
            .reply(HttpResponse::new(200).with_body(vec![0xff, 0x00]));
        let response = remote.get("/bin", RequestOptions::none()).await.unwrap();
        assert_eq!(response.body(), Some(&Body::Binary(vec![0xff, 0x00])));
    }

    #[tokio::test]
    async fn error_statuses_carry_no_body() {
        let remote = remote(DRAFT_02);
        remote.client.reply(
            HttpResponse::new(412)
                .with_header("ETag", "\"cur\"")
                .with_header("Content-Type", "text/plain")
                .with_body(b"precondition failed".to_vec()),
        );
        let response = remote
            .put("/a", Body::from("x"), None, RequestOptions::if_match("old"))
            .await
            .unwrap();
        assert_eq!(response.status, 412);
        assert_eq!(response.content, None);
        assert_eq!(response.revision.as_deref(), Some("cur"));
    }

    #[tokio::test]
    async fn folder_description_listing() {
        let remote = remote(DRAFT_02);
        let body = serde_json::json!({
            "@context": FOLDER_DESCRIPTION_CONTEXT,
            "items": {
                "bar": {"ETag": "x", "Content-Type": "text/plain", "Content-Length": 5},
                "sub/": {"ETag": "y"}
            }
        });
        remote.client.reply(
            HttpResponse::new(200)
                .with_header("Content-Type", "application/ld+json")
                .with_header("ETag", "\"f1\"")
                .with_body(body.to_string().into_bytes()),
        );
        let response = remote.get("/foo/", RequestOptions::none()).await.unwrap();
        let listing = response.listing().unwrap();
        assert_eq!(listing["bar"], ItemMeta::document("x", "text/plain", 5));
        assert_eq!(listing["sub/"], ItemMeta::with_etag("y"));
        assert_eq!(response.revision.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn legacy_listing_and_revision_cache() {
        let remote = remote(API_2012);
        remote.client.reply(
            HttpResponse::new(200)
                .with_header("Content-Type", "application/json")
                .with_body(br#"{"a":"111","b/":"222"}"#.to_vec()),
        );
        let response = remote.get("/f/", RequestOptions::none()).await.unwrap();
        assert_eq!(response.listing().unwrap()["a"], ItemMeta::with_etag("111"));

        remote.client.reply(
            HttpResponse::new(200)
                .with_header("Content-Type", "text/plain")
                .with_body(b"doc".to_vec()),
        );
        let response = remote.get("/f/a", RequestOptions::none()).await.unwrap();
        assert_eq!(response.revision.as_deref(), Some("111"));
    }

    #[tokio::test]
    async fn empty_listing_is_not_found() {
        let remote = remote(DRAFT_02);
        remote.client.reply(
            HttpResponse::new(200)
                .with_header("Content-Type", "application/json")
                .with_body(b"{}".to_vec()),
        );
        let response = remote.get("/empty/", RequestOptions::none()).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(response.content.is_none());
    }

    #[tokio::test]
    async fn request_timeout() {
        struct Stalled;

        #[async_trait]
        impl HttpClient for Stalled {
            async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, String> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(HttpResponse::new(200))
            }
        }

        let remote = WireRemote::new(Stalled).with_timeout(Duration::from_millis(20));
        remote.configure(Some("https://s.example/"), Some("t"), Some(DRAFT_02));
        let err = remote.get("/a", RequestOptions::none()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Timeout { millis: 20 }));
        assert!(!remote.online());
    }
}
