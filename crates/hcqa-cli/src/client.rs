//! HTTP client for a running HCQA server

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    user: &'a str,
}

#[derive(Serialize)]
struct DocumentBody<'a> {
    doc: &'a str,
}

#[derive(Serialize)]
struct UploadBody<'a> {
    documents: Vec<DocumentBody<'a>>,
}

/// Server reply to one upload request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponse {
    pub accepted: Vec<u64>,
    #[serde(default)]
    pub rejected_lines: Vec<usize>,
    #[serde(default)]
    pub committed: bool,
}

pub struct HcqaClient {
    http: reqwest::Client,
    base_url: String,
}

impl HcqaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Ask a question through `POST /`
    pub async fn ask(&self, query: &str, user: &str) -> anyhow::Result<String> {
        let response = self
            .http
            .post(format!("{}/", self.base_url))
            .json(&QueryBody { query, user })
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base_url))?;

        let response = check(response).await?;
        response
            .json::<String>()
            .await
            .context("server returned a non-string answer")
    }

    /// Send one batch of documents to `POST /api/v1/documents`
    pub async fn upload(&self, documents: &[String], wait: bool) -> anyhow::Result<UploadResponse> {
        let body = UploadBody {
            documents: documents.iter().map(|doc| DocumentBody { doc }).collect(),
        };

        let response = self
            .http
            .post(format!("{}/api/v1/documents", self.base_url))
            .query(&[("wait", wait)])
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base_url))?;

        let response = check(response).await?;
        response
            .json::<UploadResponse>()
            .await
            .context("unexpected upload response")
    }
}

async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<Value>().await {
        Ok(body) => body["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => String::new(),
    };
    bail!("server returned {status}: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_ask_posts_query_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_json(json!({ "query": "What treats headaches?", "user": "user" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("Aspirin.")))
            .expect(1)
            .mount(&server)
            .await;

        let client = HcqaClient::new(format!("{}/", server.uri()));
        let answer = client.ask("What treats headaches?", "user").await.unwrap();

        assert_eq!(answer, "Aspirin.");
    }

    #[tokio::test]
    async fn test_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({
                "code": "UPSTREAM_ERROR",
                "message": "Upstream provider failed"
            })))
            .mount(&server)
            .await;

        let err = HcqaClient::new(server.uri())
            .ask("q", "user")
            .await
            .unwrap_err();

        let text = err.to_string();
        assert!(text.contains("502"));
        assert!(text.contains("Upstream provider failed"));
    }

    #[tokio::test]
    async fn test_upload_sends_documents() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/documents"))
            .and(query_param("wait", "true"))
            .and(body_json(json!({ "documents": [{ "doc": "a" }, { "doc": "b" }] })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "accepted": [1, 2],
                "rejected_lines": [],
                "committed": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = HcqaClient::new(server.uri())
            .upload(&["a".to_string(), "b".to_string()], true)
            .await
            .unwrap();

        assert_eq!(response.accepted, vec![1, 2]);
        assert!(response.committed);
    }
}
