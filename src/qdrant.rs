//! Qdrant REST client.
//!
//! Talks to the HTTP API (`/collections/...`) directly with `reqwest`.
//! Authentication uses the optional `api-key` header.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use nerdsiq_core::models::{IndexPoint, ScoredPoint};
use nerdsiq_core::provider::{Distance, VectorIndex};

use crate::config::QdrantConfig;

/// Points sent per upsert request.
const UPSERT_BATCH: usize = 100;

pub struct QdrantClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantClient {
    pub fn new(config: &QdrantConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<Value> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("Qdrant {} request failed", what))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Qdrant {} failed with {}: {}", what, status, body);
        }
        Ok(resp.json().await?)
    }

    pub async fn collection_exists(&self, name: &str) -> Result<bool> {
        let resp = self
            .request(Method::GET, &format!("/collections/{}", name))
            .send()
            .await
            .context("Qdrant collection lookup failed")?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => {
                let body = resp.text().await.unwrap_or_default();
                Err(anyhow!("Qdrant collection lookup failed with {}: {}", s, body))
            }
        }
    }

    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<()> {
        let body = json!({
            "vectors": { "size": vector_size, "distance": distance.as_str() }
        });
        self.send(
            self.request(Method::PUT, &format!("/collections/{}", name))
                .json(&body),
            "create collection",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantClient {
    async fn ensure_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<()> {
        if self.collection_exists(name).await? {
            return Ok(());
        }
        tracing::info!(collection = name, vector_size, %distance, "creating collection");
        self.create_collection(name, vector_size, distance).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        let json = self
            .send(
                self.request(
                    Method::POST,
                    &format!("/collections/{}/points/search", collection),
                )
                .json(&body),
                "search",
            )
            .await?;
        parse_search_response(&json)
    }

    async fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<()> {
        for batch in points.chunks(UPSERT_BATCH) {
            let points: Vec<Value> = batch
                .iter()
                .map(|p| json!({ "id": p.id, "vector": p.vector, "payload": p.payload }))
                .collect();
            self.send(
                self.request(
                    Method::PUT,
                    &format!("/collections/{}/points?wait=true", collection),
                )
                .json(&json!({ "points": points })),
                "upsert",
            )
            .await?;
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let resp = self
            .request(Method::DELETE, &format!("/collections/{}", name))
            .send()
            .await
            .context("Qdrant delete collection request failed")?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        bail!("Qdrant delete collection failed with {}: {}", status, body)
    }

    async fn health(&self) -> Result<()> {
        self.send(self.request(Method::GET, "/collections"), "health check")
            .await?;
        Ok(())
    }
}

/// Decode `{"result": [{"id", "score", "payload"}, ...]}`.
pub fn parse_search_response(json: &Value) -> Result<Vec<ScoredPoint>> {
    let hits = json
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result array"))?;

    hits.iter()
        .map(|hit| {
            let score = hit
                .get("score")
                .and_then(Value::as_f64)
                .ok_or_else(|| anyhow!("Invalid Qdrant response: missing score"))?;
            Ok(ScoredPoint {
                payload: hit.get("payload").cloned().unwrap_or(Value::Null),
                score: score as f32,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_response() {
        let json = json!({
            "result": [
                { "id": 3, "score": 0.91, "payload": { "text": "a", "source_url": "u1" } },
                { "id": 7, "score": 0.42, "payload": { "text": "b" } },
            ],
            "status": "ok",
        });
        let hits = parse_search_response(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload["source_url"], "u1");
        assert!((hits[1].score - 0.42).abs() < 1e-6);
    }

    #[test]
    fn test_parse_search_response_rejects_malformed() {
        assert!(parse_search_response(&json!({ "status": "ok" })).is_err());
        assert!(parse_search_response(&json!({ "result": [{ "id": 1 }] })).is_err());
    }

    #[test]
    fn test_parse_empty_result() {
        assert!(parse_search_response(&json!({ "result": [] })).unwrap().is_empty());
    }
}
