//! Remote retrieval service over HTTP
//!
//! `POST {base_url}/api/rag/enhanced/retrieve` with
//! `{client_id, query, top_k, min_relevance}`; the response is
//! `{success, data: {snippets: [{content, doc_id?, relevance?}]}}`.

use super::{RetrievalError, RetrievalService, Snippet};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const RETRIEVE_PATH: &str = "/api/rag/enhanced/retrieve";

#[derive(Debug, Clone)]
pub struct HttpRetrievalClient {
    base_url: String,
    top_k: usize,
    min_relevance: f64,
    client: Client,
}

impl HttpRetrievalClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RetrievalError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            top_k: 3,
            min_relevance: 0.3,
            client,
        })
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_relevance(mut self, min_relevance: f64) -> Self {
        self.min_relevance = min_relevance;
        self
    }
}

#[derive(Debug, Serialize)]
struct RetrieveRequest<'a> {
    client_id: String,
    query: &'a str,
    top_k: usize,
    min_relevance: f64,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<RetrieveData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrieveData {
    #[serde(default)]
    snippets: Vec<RawSnippet>,
}

#[derive(Debug, Deserialize)]
struct RawSnippet {
    #[serde(default)]
    content: String,
    #[serde(default)]
    doc_id: Option<String>,
    #[serde(default, alias = "score")]
    relevance: Option<f64>,
}

#[async_trait]
impl RetrievalService for HttpRetrievalClient {
    async fn retrieve(&self, account: &str, query: &str) -> Result<Vec<Snippet>, RetrievalError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), RETRIEVE_PATH);
        let response = self
            .client
            .post(&url)
            .json(&RetrieveRequest {
                client_id: account.to_lowercase(),
                query,
                top_k: self.top_k,
                min_relevance: self.min_relevance,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: RetrieveResponse = response.json().await?;
        if !body.success {
            return Err(RetrievalError::Unavailable(
                body.error.unwrap_or_else(|| "service reported failure".to_string()),
            ));
        }

        Ok(body
            .data
            .unwrap_or_default()
            .snippets
            .into_iter()
            .filter(|raw| !raw.content.trim().is_empty())
            .map(|raw| {
                let mut snippet = Snippet::new(raw.content).with_relevance(raw.relevance.unwrap_or(1.0));
                snippet.source = raw.doc_id;
                snippet
            })
            .collect())
    }

    fn name(&self) -> &str {
        "remote retrieval"
    }
}
