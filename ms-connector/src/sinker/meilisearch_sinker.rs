use anyhow::bail;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{header, Client, Method, Response};
use serde_json::Value;

use ms_common::{error::Error, meta::doc_converter::Document};

use crate::Sinker;

/// Thin facade over the MeiliSearch document API. Upserts are keyed by the
/// primary-key field, deletes by id list; both are idempotent on the server
/// side, so no retry happens here.
#[derive(Clone)]
pub struct MeilisearchSinker {
    pub http_client: Client,
    pub api_url: String,
    pub api_key: String,
}

#[async_trait]
impl Sinker for MeilisearchSinker {
    async fn add_documents(
        &self,
        index: &str,
        docs: &[Document],
        primary_key: &str,
    ) -> anyhow::Result<()> {
        let url = self.add_documents_url(index, primary_key);
        let body = serde_json::to_string(docs)?;
        let request = self.build_request(Method::POST, &url, body)?;
        let response = self.http_client.execute(request).await?;
        Self::check_response(response).await
    }

    async fn delete_documents(&self, index: &str, ids: &[String]) -> anyhow::Result<()> {
        let url = self.delete_documents_url(index);
        let body = serde_json::to_string(ids)?;
        let request = self.build_request(Method::POST, &url, body)?;
        let response = self.http_client.execute(request).await?;
        Self::check_response(response).await
    }
}

impl MeilisearchSinker {
    pub fn new(api_url: &str, api_key: &str) -> Self {
        Self {
            http_client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub async fn health(&self) -> anyhow::Result<()> {
        let url = format!("{}/health", self.api_url);
        let request = self.build_request(Method::GET, &url, String::new())?;
        let response = self.http_client.execute(request).await?;

        let status_code = response.status();
        if !status_code.is_success() {
            bail! {Error::HttpError(format!(
                "health check failed, status_code: {}",
                status_code
            ))}
        }

        let json_value: Value = response.json().await?;
        if json_value["status"] != "available" {
            bail! {Error::HttpError(format!(
                "meilisearch is not available: {}",
                json_value
            ))}
        }
        Ok(())
    }

    fn add_documents_url(&self, index: &str, primary_key: &str) -> String {
        format!(
            "{}/indexes/{}/documents?primaryKey={}",
            self.api_url,
            Self::encode(index),
            Self::encode(primary_key)
        )
    }

    fn delete_documents_url(&self, index: &str) -> String {
        format!(
            "{}/indexes/{}/documents/delete-batch",
            self.api_url,
            Self::encode(index)
        )
    }

    fn encode(segment: &str) -> String {
        utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string()
    }

    fn build_request(&self, method: Method, url: &str, body: String) -> anyhow::Result<reqwest::Request> {
        let mut builder = self
            .http_client
            .request(method, url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        Ok(builder.build()?)
    }

    async fn check_response(response: Response) -> anyhow::Result<()> {
        let status_code = response.status();
        if !status_code.is_success() {
            let response_text = response.text().await.unwrap_or_default();
            bail! {Error::HttpError(format!(
                "document request failed, status_code: {}, response_text: {:?}",
                status_code, response_text
            ))}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let sinker = MeilisearchSinker::new("http://127.0.0.1:7700/", "key");
        assert_eq!(
            sinker.add_documents_url("books_idx", "id"),
            "http://127.0.0.1:7700/indexes/books%5Fidx/documents?primaryKey=id"
        );
        assert_eq!(
            sinker.delete_documents_url("books"),
            "http://127.0.0.1:7700/indexes/books/documents/delete-batch"
        );
    }
}
