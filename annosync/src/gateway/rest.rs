//! REST gateway for the hosted annotation service.
//!
//! Talks to a PostgREST-style endpoint (`/rest/v1/<table>`), filtering with
//! `column=eq.value` query parameters.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::AnnotationGateway;
use crate::config::{AppConfig, MAX_LOG_BODY_CHARS};
use crate::database::{Annotation, AnnotationPatch, AnnotationRecord, Category};
use crate::error::{AppError, Result};
use crate::identity::IdentityProvider;

/// Error body returned by the service on non-2xx responses
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

impl ApiErrorResponse {
    fn describe(&self) -> String {
        let mut text = match &self.code {
            Some(code) => format!("{}: {}", code, self.message),
            None => self.message.clone(),
        };
        if let Some(details) = &self.details {
            text.push_str(&format!(" ({})", details));
        }
        if let Some(hint) = &self.hint {
            text.push_str(&format!(" hint: {}", hint));
        }
        text
    }
}

fn preview(body: &str) -> String {
    let mut text = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_LOG_BODY_CHARS {
        text.push_str("...");
    }
    text
}

fn eq_filter(value: &str) -> String {
    format!("eq.{}", value)
}

/// Gateway backed by the hosted REST API
#[derive(Clone)]
pub struct RestGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl RestGateway {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: Self::endpoint_for(&config.remote_url, &config.table),
            api_key: config.api_key.clone(),
            identity: None,
        })
    }

    /// Send the signed-in user's session token instead of the bare API key
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    fn endpoint_for(remote_url: &str, table: &str) -> String {
        format!("{}/rest/v1/{}", remote_url.trim_end_matches('/'), table)
    }

    async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|_| AppError::Config("Invalid API key format".to_string()))?;
        headers.insert("apikey", key);

        let token = match &self.identity {
            Some(identity) => identity.access_token().await,
            None => None,
        };
        let bearer = token.as_deref().unwrap_or(&self.api_key);
        let auth = HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|_| AppError::Config("Invalid access token format".to_string()))?;
        headers.insert(AUTHORIZATION, auth);

        Ok(headers)
    }

    /// Read the body and turn non-2xx statuses into gateway errors
    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            tracing::debug!("Gateway response status: {}", status);
            return Ok(body);
        }

        tracing::debug!("Gateway response error ({}): {}", status, preview(&body));

        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(error) => error.describe(),
            Err(_) => format!("Request failed: {}", preview(&body)),
        };
        Err(AppError::gateway(status.as_u16(), message))
    }

    async fn select(&self, filters: &[(&str, String)]) -> Result<Vec<Annotation>> {
        let mut query: Vec<(&str, String)> = vec![("select", "*".to_string())];
        query.extend(filters.iter().cloned());

        let response = self
            .client
            .get(&self.endpoint)
            .headers(self.headers().await?)
            .query(&query)
            .send()
            .await?;

        let body = Self::read_body(response).await?;
        let rows: Vec<Annotation> = serde_json::from_str(&body)?;
        Ok(rows)
    }
}

#[async_trait]
impl AnnotationGateway for RestGateway {
    async fn insert(&self, record: &AnnotationRecord) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers().await?)
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;

        Self::read_body(response).await?;
        tracing::debug!("Inserted annotation remotely: {}", record.id);
        Ok(())
    }

    async fn update(&self, id: &str, patch: &AnnotationPatch) -> Result<()> {
        let response = self
            .client
            .patch(&self.endpoint)
            .headers(self.headers().await?)
            .header("Prefer", "return=minimal")
            .query(&[("id", eq_filter(id))])
            .json(patch)
            .send()
            .await?;

        Self::read_body(response).await?;
        tracing::debug!("Updated annotation remotely: {}", id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(&self.endpoint)
            .headers(self.headers().await?)
            .query(&[("id", eq_filter(id))])
            .send()
            .await?;

        Self::read_body(response).await?;
        tracing::debug!("Deleted annotation remotely: {}", id);
        Ok(())
    }

    async fn select_by_book(&self, book_id: &str) -> Result<Vec<Annotation>> {
        self.select(&[
            ("book_id", eq_filter(book_id)),
            ("order", "created_at.desc".to_string()),
        ])
        .await
    }

    async fn select_by_chapter(&self, chapter_id: &str) -> Result<Vec<Annotation>> {
        self.select(&[
            ("chapter_id", eq_filter(chapter_id)),
            ("order", "position.asc".to_string()),
        ])
        .await
    }

    async fn select_by_id(&self, id: &str) -> Result<Option<Annotation>> {
        let rows = self
            .select(&[("id", eq_filter(id)), ("limit", "1".to_string())])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn select_by_category(
        &self,
        book_id: &str,
        category: Category,
    ) -> Result<Vec<Annotation>> {
        self.select(&[
            ("book_id", eq_filter(book_id)),
            ("category", eq_filter(category.label())),
            ("order", "created_at.desc".to_string()),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;

    fn config() -> AppConfig {
        AppConfig::new("https://example.supabase.co/", "anon-key", "/tmp/unused.db")
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(
            RestGateway::endpoint_for("https://example.supabase.co/", "annotations"),
            "https://example.supabase.co/rest/v1/annotations"
        );
    }

    #[test]
    fn test_error_body_description() {
        let error: ApiErrorResponse = serde_json::from_str(
            r#"{"message":"duplicate key value","code":"23505","details":"Key (id) exists","hint":null}"#,
        )
        .unwrap();

        assert_eq!(
            error.describe(),
            "23505: duplicate key value (Key (id) exists)"
        );
    }

    #[test]
    fn test_preview_truncates_long_bodies() {
        let body = "x".repeat(MAX_LOG_BODY_CHARS + 10);
        let text = preview(&body);

        assert!(text.ends_with("..."));
        assert_eq!(text.len(), MAX_LOG_BODY_CHARS + 3);
    }

    #[tokio::test]
    async fn test_headers_fall_back_to_api_key() {
        let gateway = RestGateway::new(&config()).unwrap();
        let headers = gateway.headers().await.unwrap();

        assert_eq!(headers.get("apikey").unwrap(), "anon-key");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer anon-key");
    }

    #[tokio::test]
    async fn test_headers_use_session_token() {
        let identity = StaticIdentity::signed_out();
        identity.sign_in("user-1", Some("session-jwt".to_string()));

        let gateway = RestGateway::new(&config())
            .unwrap()
            .with_identity(Arc::new(identity));
        let headers = gateway.headers().await.unwrap();

        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer session-jwt");
    }
}
