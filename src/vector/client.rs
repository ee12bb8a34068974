//! HTTP client wrapper for the vector store.

use crate::config::get_config;
use crate::vector::types::{
    ChunkPoint, ListCollectionsResponse, QueryPoint, QueryResponse, QueryResponseResult,
    RetrievedChunk, VectorStoreError,
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;

/// Lightweight HTTP client for vector store operations.
pub struct VectorStoreClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl VectorStoreClient {
    /// Construct a client for the given endpoint with a per-request timeout.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VectorStoreError> {
        let client = Client::builder()
            .user_agent("knowledge-engine/0.3")
            .timeout(timeout)
            .build()?;
        let base_url = normalize_base_url(base_url).map_err(VectorStoreError::InvalidUrl)?;
        tracing::debug!(url = %base_url, "Initialized vector store HTTP client");

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Construct a client using configuration derived from the environment.
    pub fn from_config() -> Result<Self, VectorStoreError> {
        let config = get_config();
        Self::new(
            &config.vector_store_url,
            config.vector_store_api_key.clone(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    /// Create a collection only when it is missing from the store.
    pub async fn ensure_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), VectorStoreError> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }

        tracing::debug!(
            collection = collection_name,
            vector_size,
            "Creating collection"
        );
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Euclid"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection created");
        })
        .await
    }

    /// Retrieve the names of all collections present in the store.
    pub async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        let response = self.request(Method::GET, "collections").send().await?;

        if response.status().is_success() {
            let payload: ListCollectionsResponse = response.json().await?;
            let names = payload
                .result
                .collections
                .into_iter()
                .map(|collection| collection.name)
                .collect();
            Ok(names)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Failed to list collections");
            Err(error)
        }
    }

    /// Delete a collection and all chunks stored in it.
    pub async fn delete_collection(&self, collection_name: &str) -> Result<(), VectorStoreError> {
        let response = self
            .request(Method::DELETE, &format!("collections/{collection_name}"))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::info!(collection = collection_name, "Collection deleted");
        })
        .await
    }

    /// Upsert prepared chunks into the given collection.
    ///
    /// Point ids are deterministic, so replaying the same document overwrites in place instead
    /// of duplicating chunks. The chunk text is stored under the reserved `text` payload key,
    /// which only this client writes and reads.
    pub async fn upsert_chunks(
        &self,
        collection_name: &str,
        chunks: Vec<ChunkPoint>,
    ) -> Result<usize, VectorStoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let serialized: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let mut payload = chunk.metadata;
                payload.insert("text".into(), Value::String(chunk.text));
                json!({
                    "id": chunk.id,
                    "vector": chunk.vector,
                    "payload": payload,
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{collection_name}/points"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Chunks upserted"
            );
        })
        .await?;

        Ok(point_count)
    }

    /// Query a collection for the `k` nearest chunks, optionally constrained by a metadata
    /// filter. Results arrive sorted by distance ascending.
    pub async fn query(
        &self,
        collection_name: &str,
        vector: Vec<f32>,
        k: usize,
        filter: Option<Value>,
    ) -> Result<Vec<RetrievedChunk>, VectorStoreError> {
        let mut body = json!({
            "query": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter_value) = filter {
            body.as_object_mut()
                .expect("query body should remain an object")
                .insert("filter".into(), filter_value);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/query"),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, error = %error, "Vector query failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        Ok(points.into_iter().map(into_retrieved_chunk).collect())
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool, VectorStoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = VectorStoreError::UnexpectedStatus { status, body };
                tracing::error!(collection = collection_name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), VectorStoreError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Vector store request failed");
            Err(error)
        }
    }
}

fn into_retrieved_chunk(point: QueryPoint) -> RetrievedChunk {
    let mut metadata = point.payload.unwrap_or_default();
    let text = match metadata.remove("text") {
        Some(Value::String(text)) => text,
        _ => String::new(),
    };

    RetrievedChunk {
        id: stringify_point_id(point.id),
        score: point.score,
        text,
        metadata,
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::DELETE, Method::GET, Method::POST, Method::PUT, MockServer};
    use serde_json::Map;

    fn client_for(server: &MockServer) -> VectorStoreClient {
        VectorStoreClient::new(&server.base_url(), None, Duration::from_secs(5))
            .expect("client")
    }

    #[tokio::test]
    async fn query_parses_scored_chunks() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/demo/points/query");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "result": [
                        {
                            "id": "chunk-1",
                            "score": 0.12,
                            "payload": {
                                "text": "Remote work policy",
                                "collection": "policy_collection",
                                "city": "NY"
                            }
                        }
                    ]
                }));
            })
            .await;

        let results = client_for(&server)
            .query("demo", vec![0.1, 0.2], 4, None)
            .await
            .expect("query");

        mock.assert();
        assert_eq!(results.len(), 1);
        let hit = &results[0];
        assert_eq!(hit.id, "chunk-1");
        assert!((hit.score - 0.12).abs() < f32::EPSILON);
        assert_eq!(hit.text, "Remote work policy");
        assert_eq!(hit.metadata["city"], Value::String("NY".into()));
        assert!(!hit.metadata.contains_key("text"));
    }

    #[tokio::test]
    async fn query_includes_filter_when_present() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/demo/points/query")
                    .json_body_partial(
                        json!({
                            "filter": {
                                "must": [
                                    { "key": "city", "match": { "value": "NY" } }
                                ]
                            }
                        })
                        .to_string(),
                    );
                then.status(200).json_body(json!({ "result": [] }));
            })
            .await;

        let filter = json!({
            "must": [
                { "key": "city", "match": { "value": "NY" } }
            ]
        });
        let results = client_for(&server)
            .query("demo", vec![0.1], 4, Some(filter))
            .await
            .expect("query");

        mock.assert();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn ensure_collection_skips_existing() {
        let server = MockServer::start_async().await;
        let exists = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/demo");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;

        client_for(&server)
            .ensure_collection("demo", 8)
            .await
            .expect("ensure");

        exists.assert();
    }

    #[tokio::test]
    async fn ensure_collection_creates_missing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/demo");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/demo");
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;

        client_for(&server)
            .ensure_collection("demo", 8)
            .await
            .expect("ensure");

        create.assert();
    }

    #[tokio::test]
    async fn upsert_chunks_sends_points_with_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/demo/points")
                    // The chunk text is written once, under the reserved payload key.
                    .json_body_partial(
                        json!({
                            "points": [
                                { "payload": { "collection": "demo", "text": "chunk" } }
                            ]
                        })
                        .to_string(),
                    );
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;

        let mut metadata = Map::new();
        metadata.insert("collection".into(), Value::String("demo".into()));
        let count = client_for(&server)
            .upsert_chunks(
                "demo",
                vec![ChunkPoint {
                    id: "00000000-0000-0000-0000-000000000001".into(),
                    vector: vec![0.1, 0.2],
                    text: "chunk".into(),
                    metadata,
                }],
            )
            .await
            .expect("upsert");

        mock.assert();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn delete_collection_reports_unexpected_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/collections/demo");
                then.status(500).body("boom");
            })
            .await;

        let error = client_for(&server)
            .delete_collection("demo")
            .await
            .expect_err("status error");

        assert!(matches!(
            error,
            VectorStoreError::UnexpectedStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }
}
