use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Thin PostgREST client. Every call forwards the caller's bearer token so the
/// store's row-level policies decide what the caller may read or write.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = auth_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(&self, method: Method, path: &str,
                                         auth_token: Option<&str>, body: Option<Value>,
                                         extra_headers: Option<HeaderMap>)
                                         -> Result<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// Headers asking PostgREST to echo the written rows back.
    pub fn return_representation() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> AppConfig {
        AppConfig {
            supabase_url: format!("{}/", url),
            supabase_anon_key: "test-anon-key".to_string(),
            supabase_jwt_secret: "secret".to_string(),
            supabase_webhook_secret: String::new(),
            reschedule_webhook_url: String::new(),
            port: 3000,
        }
    }

    #[tokio::test]
    async fn test_request_forwards_token_and_api_key() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/doctors"))
            .and(query_param("id", "eq.1"))
            .and(header("apikey", "test-anon-key"))
            .and(header("Authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .mount(&mock_server)
            .await;

        let client = SupabaseClient::new(&config(&mock_server.uri()));
        let rows: Vec<Value> = client
            .request(Method::GET, "/rest/v1/doctors?id=eq.1", Some("user-token"), None)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_request_with_headers_sends_prefer() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/patients"))
            .and(header("Prefer", "return=representation"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": "p1"}])))
            .mount(&mock_server)
            .await;

        let client = SupabaseClient::new(&config(&mock_server.uri()));
        let rows: Vec<Value> = client
            .request_with_headers(
                Method::POST,
                "/rest/v1/patients",
                Some("user-token"),
                Some(json!({"first_name": "Aziz"})),
                Some(SupabaseClient::return_representation()),
            )
            .await
            .unwrap();

        assert_eq!(rows[0]["id"], "p1");
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(401).set_body_string("JWT expired"))
            .mount(&mock_server)
            .await;

        let client = SupabaseClient::new(&config(&mock_server.uri()));
        let result: Result<Vec<Value>> = client
            .request(Method::GET, "/rest/v1/appointments", Some("stale"), None)
            .await;

        let err = result.unwrap_err().to_string();
        assert!(err.starts_with("Authentication error"));
    }
}
