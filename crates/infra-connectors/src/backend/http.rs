// HTTP backend: pages a JSON-array endpoint with ?page=N&per_page=M
use async_trait::async_trait;
use quarry_core::domain::{BackendArgs, Cursor, Item, RawBatch};
use quarry_core::port::{Backend, BackendError};
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{optional_str, positive_usize, required_str};

pub const BACKEND_TYPE: &str = "http";

const DEFAULT_PER_PAGE: usize = 50;

/// Cursor = number of items consumed so far
///
/// Resuming inside a partly filled page skips the entries already delivered,
/// so items appended to the last page later are still picked up.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    url: String,
    token: Option<String>,
    per_page: usize,
}

impl HttpBackend {
    /// # Arguments
    /// * `url` - Endpoint returning a JSON array per page (required)
    /// * `token` - Bearer token
    /// * `per_page` - Page size (default 50)
    pub fn from_args(client: Client, args: &BackendArgs) -> Result<Self, BackendError> {
        let url = required_str(args, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(BackendError::Permanent(format!(
                "url must be http(s): {}",
                url
            )));
        }

        Ok(Self {
            client,
            url: url.to_string(),
            token: optional_str(args, "token")?.map(str::to_string),
            per_page: positive_usize(args, "per_page", DEFAULT_PER_PAGE)?,
        })
    }

    fn consumed(from: Option<&Cursor>) -> Result<u64, BackendError> {
        match from {
            None => Ok(0),
            Some(cursor) => cursor
                .as_str()
                .parse::<u64>()
                .map_err(|_| BackendError::Permanent(format!("bad offset cursor: {}", cursor))),
        }
    }
}

fn entries(payload: &[u8]) -> Result<Vec<serde_json::Value>, BackendError> {
    let value: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| BackendError::Permanent(format!("page is not JSON: {}", e)))?;
    match value {
        serde_json::Value::Array(entries) => Ok(entries),
        _ => Err(BackendError::Permanent("page is not a JSON array".to_string())),
    }
}

/// Error for a non-success status, `None` when the status is a success
pub(crate) fn classify_status(status: StatusCode) -> Option<BackendError> {
    if status.is_success() {
        return None;
    }
    let transient = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();
    let message = format!("server answered {}", status);
    Some(if transient {
        BackendError::Transient(message)
    } else {
        BackendError::Permanent(message)
    })
}

fn request_error(err: reqwest::Error) -> BackendError {
    if err.is_builder() {
        BackendError::Permanent(format!("invalid request: {}", err))
    } else {
        // Connect, timeout and body errors
        BackendError::Transient(err.to_string())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch(&self, from: Option<&Cursor>) -> Result<Option<RawBatch>, BackendError> {
        let consumed = Self::consumed(from)?;
        let per_page = self.per_page as u64;
        let page = consumed / per_page + 1;
        let skip = (consumed % per_page) as usize;

        let mut request = self
            .client
            .get(&self.url)
            .query(&[("page", page), ("per_page", per_page)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(request_error)?;
        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }
        let payload = response.bytes().await.map_err(request_error)?.to_vec();

        // Nothing past what was already consumed ends the stream
        let fresh: Vec<_> = entries(&payload)?.into_iter().skip(skip).collect();
        debug!(
            url = %self.url,
            page = page,
            skipped = skip,
            items = fresh.len(),
            "Fetched http page"
        );
        if fresh.is_empty() {
            return Ok(None);
        }

        let next = consumed + fresh.len() as u64;
        let payload = serde_json::to_vec(&fresh)
            .map_err(|e| BackendError::Permanent(format!("page re-encoding failed: {}", e)))?;
        Ok(Some(RawBatch::new(Cursor::new(next.to_string()), payload)))
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<Item>, BackendError> {
        entries(payload)?
            .into_iter()
            .map(|entry| {
                let id = item_id(&entry).ok_or_else(|| {
                    BackendError::Permanent(format!("entry without id: {}", entry))
                })?;
                Ok(Item::new(id, entry))
            })
            .collect()
    }
}

/// `id`, `number` or `uuid`, whichever comes first
fn item_id(entry: &serde_json::Value) -> Option<String> {
    ["id", "number", "uuid"]
        .iter()
        .find_map(|key| match entry.get(*key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Page of entries numbered `1..=total`
    fn numbered(params: &HashMap<String, u64>, total: u64) -> Json<serde_json::Value> {
        let page = params.get("page").copied().unwrap_or(1);
        let per_page = params.get("per_page").copied().unwrap_or(50);
        let start = (page - 1) * per_page + 1;
        let entries: Vec<_> = (start..=total.min(start + per_page - 1))
            .map(|id| json!({"id": id, "title": format!("issue {}", id)}))
            .collect();
        Json(json!(entries))
    }

    async fn items(Query(params): Query<HashMap<String, u64>>) -> Json<serde_json::Value> {
        numbered(&params, 5)
    }

    async fn growing(
        State(total): State<Arc<AtomicU64>>,
        Query(params): Query<HashMap<String, u64>>,
    ) -> Json<serde_json::Value> {
        numbered(&params, total.load(Ordering::SeqCst))
    }

    async fn private(headers: HeaderMap) -> Result<Json<serde_json::Value>, AxumStatus> {
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some("Bearer secret") => Ok(Json(json!([{"number": 7}]))),
            _ => Err(AxumStatus::UNAUTHORIZED),
        }
    }

    async fn spawn_server() -> String {
        spawn_growing_server(Arc::new(AtomicU64::new(0))).await
    }

    /// `/growing` serves `total` entries, read on every request
    async fn spawn_growing_server(total: Arc<AtomicU64>) -> String {
        let app = Router::new()
            .route("/items", get(items))
            .route("/private", get(private))
            .route("/busy", get(|| async { AxumStatus::SERVICE_UNAVAILABLE }))
            .route("/growing", get(growing))
            .with_state(total);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn backend(url: String, extra: serde_json::Value) -> HttpBackend {
        let mut args = json!({"url": url}).as_object().cloned().unwrap();
        args.extend(extra.as_object().cloned().unwrap());
        HttpBackend::from_args(Client::new(), &args).unwrap()
    }

    #[tokio::test]
    async fn test_pages_until_empty() {
        let base = spawn_server().await;
        let backend = backend(format!("{}/items", base), json!({"per_page": 2}));

        let mut cursor = None;
        let mut ids = Vec::new();
        loop {
            let Some(batch) = backend.fetch(cursor.as_ref()).await.unwrap() else {
                break;
            };
            ids.extend(backend.decode(&batch.payload).unwrap().into_iter().map(|i| i.id));
            cursor = Some(batch.next);
        }

        assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
        assert_eq!(cursor, Some(Cursor::new("5")));
    }

    #[tokio::test]
    async fn test_items_appended_to_last_page_are_picked_up() {
        let total = Arc::new(AtomicU64::new(3));
        let base = spawn_growing_server(total.clone()).await;
        let backend = backend(format!("{}/growing", base), json!({"per_page": 10}));

        let first = backend.fetch(None).await.unwrap().unwrap();
        assert_eq!(first.next, Cursor::new("3"));
        assert_eq!(backend.decode(&first.payload).unwrap().len(), 3);
        assert!(backend.fetch(Some(&first.next)).await.unwrap().is_none());

        total.store(5, Ordering::SeqCst);
        let second = backend.fetch(Some(&first.next)).await.unwrap().unwrap();
        let ids: Vec<_> = backend
            .decode(&second.payload)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["4", "5"]);
        assert_eq!(second.next, Cursor::new("5"));
    }

    #[tokio::test]
    async fn test_token_is_sent_as_bearer() {
        let base = spawn_server().await;

        let anonymous = backend(format!("{}/private", base), json!({}));
        let err = anonymous.fetch(None).await.unwrap_err();
        assert!(matches!(err, BackendError::Permanent(msg) if msg.contains("401")));

        let authorized = backend(format!("{}/private", base), json!({"token": "secret"}));
        let batch = authorized.fetch(None).await.unwrap().unwrap();
        assert_eq!(authorized.decode(&batch.payload).unwrap()[0].id, "7");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let base = spawn_server().await;
        let backend = backend(format!("{}/busy", base), json!({}));
        assert!(backend.fetch(None).await.unwrap_err().is_transient());
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_none());
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN, StatusCode::NOT_FOUND] {
            assert!(matches!(classify_status(status), Some(BackendError::Permanent(_))));
        }
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
        ] {
            assert!(matches!(classify_status(status), Some(BackendError::Transient(_))));
        }
    }

    #[test]
    fn test_bad_cursor_and_payloads_are_permanent() {
        let backend = backend("http://localhost/items".to_string(), json!({}));
        assert!(HttpBackend::consumed(Some(&Cursor::new("abc"))).is_err());
        assert_eq!(HttpBackend::consumed(Some(&Cursor::new("12"))).unwrap(), 12);
        assert!(backend.decode(b"{\"id\": 1}").is_err());
        assert!(backend.decode(b"[{\"title\": \"no id\"}]").is_err());
        assert!(backend.decode(b"not json").is_err());
    }
}
