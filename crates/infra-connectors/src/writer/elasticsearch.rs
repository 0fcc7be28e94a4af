// Elasticsearch writer: `_bulk` index with the item id as document id
use async_trait::async_trait;
use quarry_core::domain::Item;
use quarry_core::port::{ItemWriter, WriterError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

/// Replays are idempotent: the same item overwrites the same document
pub struct ElasticsearchWriter {
    client: Client,
    url: String,
    index: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<std::collections::HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ElasticsearchWriter {
    pub fn new(client: Client, url: &str, index: impl Into<String>) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            index: index.into(),
        }
    }

    /// NDJSON action/document pairs for `items`
    fn bulk_body(&self, items: &[Item]) -> Result<Vec<u8>, WriterError> {
        let mut body = Vec::new();
        for item in items {
            let action = serde_json::json!({"index": {"_index": self.index, "_id": item.id}});
            let document = match &item.data {
                serde_json::Value::Object(_) => item.data.clone(),
                other => serde_json::json!({"value": other}),
            };
            for line in [action, document] {
                serde_json::to_writer(&mut body, &line).map_err(|e| WriterError::Rejected {
                    accepted: 0,
                    reason: e.to_string(),
                })?;
                body.push(b'\n');
            }
        }
        Ok(body)
    }
}

/// Accepted count and first failure reason of a bulk response
fn summarize(response: &BulkResponse) -> (usize, Option<String>) {
    let mut accepted = 0;
    let mut first_error = None;
    for entry in &response.items {
        for item in entry.values() {
            if (200..300).contains(&item.status) {
                accepted += 1;
            } else if first_error.is_none() {
                first_error = Some(match &item.error {
                    Some(error) => format!("status {}: {}", item.status, error),
                    None => format!("status {}", item.status),
                });
            }
        }
    }
    (accepted, first_error)
}

#[async_trait]
impl ItemWriter for ElasticsearchWriter {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    async fn write(&self, items: &[Item]) -> Result<usize, WriterError> {
        if items.is_empty() {
            return Ok(0);
        }
        let body = self.bulk_body(items)?;

        let response = self
            .client
            .post(format!("{}/_bulk", self.url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| WriterError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(WriterError::Unavailable(format!("bulk answered {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WriterError::Rejected {
                accepted: 0,
                reason: format!("bulk answered {}: {}", status, text),
            });
        }

        let bulk: BulkResponse = response.json().await.map_err(|e| WriterError::Rejected {
            accepted: 0,
            reason: format!("unreadable bulk response: {}", e),
        })?;
        let (accepted, first_error) = summarize(&bulk);

        if bulk.errors || accepted < items.len() {
            let reason = first_error.unwrap_or_else(|| "bulk reported errors".to_string());
            warn!(index = %self.index, accepted = accepted, reason = %reason, "Bulk partially rejected");
            return Err(WriterError::Rejected { accepted, reason });
        }

        debug!(index = %self.index, items = accepted, "Bulk indexed");
        Ok(accepted)
    }

    async fn flush(&self) -> Result<(), WriterError> {
        let response = self
            .client
            .post(format!("{}/{}/_refresh", self.url, self.index))
            .send()
            .await
            .map_err(|e| WriterError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(WriterError::Unavailable(format!(
                "refresh answered {}",
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Fixture {
        bodies: Arc<Mutex<Vec<String>>>,
        reject_id: Arc<Mutex<Option<String>>>,
    }

    async fn bulk(State(fixture): State<Fixture>, body: String) -> Json<serde_json::Value> {
        fixture.bodies.lock().unwrap().push(body.clone());
        let reject = fixture.reject_id.lock().unwrap().clone();

        let items: Vec<_> = body
            .lines()
            .step_by(2)
            .map(|line| {
                let action: serde_json::Value = serde_json::from_str(line).unwrap();
                let id = action["index"]["_id"].as_str().unwrap().to_string();
                if Some(&id) == reject.as_ref() {
                    json!({"index": {"_id": id, "status": 400, "error": {"type": "mapper_parsing_exception"}}})
                } else {
                    json!({"index": {"_id": id, "status": 201}})
                }
            })
            .collect();
        let errors = items.iter().any(|i| i["index"]["status"] != 201);
        Json(json!({"took": 1, "errors": errors, "items": items}))
    }

    async fn spawn_server(fixture: Fixture) -> String {
        let app = Router::new()
            .route("/_bulk", post(bulk))
            .route("/items/_refresh", post(|| async { Json(json!({})) }))
            .with_state(fixture);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn items() -> Vec<Item> {
        vec![
            Item::new("a", json!({"title": "first"})),
            Item::new("b", json!("scalar")),
            Item::new("c", json!({"title": "third"})),
        ]
    }

    #[tokio::test]
    async fn test_bulk_indexes_with_item_ids() {
        let fixture = Fixture::default();
        let url = spawn_server(fixture.clone()).await;
        let writer = ElasticsearchWriter::new(Client::new(), &url, "items");

        assert_eq!(writer.write(&items()).await.unwrap(), 3);
        writer.flush().await.unwrap();

        let bodies = fixture.bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        let lines: Vec<serde_json::Value> = bodies[0]
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0]["index"]["_index"], "items");
        assert_eq!(lines[0]["index"]["_id"], "a");
        assert_eq!(lines[3]["value"], "scalar");
    }

    #[tokio::test]
    async fn test_partial_rejection_reports_accepted_count() {
        let fixture = Fixture::default();
        *fixture.reject_id.lock().unwrap() = Some("b".to_string());
        let url = spawn_server(fixture).await;
        let writer = ElasticsearchWriter::new(Client::new(), &url, "items");

        let err = writer.write(&items()).await.unwrap_err();
        match err {
            WriterError::Rejected { accepted, reason } => {
                assert_eq!(accepted, 2);
                assert!(reason.contains("mapper_parsing_exception"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_unavailable() {
        let writer = ElasticsearchWriter::new(Client::new(), "http://127.0.0.1:9", "items");
        let err = writer.write(&items()).await.unwrap_err();
        assert!(matches!(err, WriterError::Unavailable(_)));
    }
}
