//! HTTP transport for `OpenRouter`.
//!
//! Two independent calls:
//!
//! - [`OpenRouterClient::stream_chat`] posts a validated [`ChatRequest`] and
//!   hands back the raw response body as a byte stream for the SSE decoder
//! - [`OpenRouterClient::fetch_generation`] looks up a finished generation by
//!   its provider-assigned id, outside the streaming path
//!
//! The transport knows nothing about SSE framing or run state.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use orchat_types::GenerationId;
use serde_json::Value;

use crate::request::ChatRequest;
use crate::retry::{RetryConfig, RetryOutcome, send_with_retry};
use crate::{OPENROUTER_API_BASE_URL, TransportError, read_capped_error_body};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const LOOKUP_TIMEOUT_SECS: u64 = 30;

/// Attribution headers `OpenRouter` shows on its dashboards.
const APP_REFERER: &str = "https://github.com/orchat/orchat";
const APP_TITLE: &str = "orchat";

/// Response body of a streaming call, chunked however the network delivered it.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[derive(Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

// Manual Debug impl to prevent leaking the API key in logs.
impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_base_url(api_key, OPENROUTER_API_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let http = client_builder().build().map_err(TransportError::Client)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            retry: RetryConfig::default(),
        })
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `/chat/completions` and return the response body as bytes.
    ///
    /// Non-2xx statuses (after retries) become [`TransportError::Http`] with a
    /// capped copy of the error body; no bytes are streamed in that case.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<ByteStream, TransportError> {
        let url = format!("{}/chat/completions", self.base_url);
        let auth = format!("Bearer {}", self.api_key);

        tracing::debug!(model = request.model(), %url, "Sending chat request");
        let outcome = send_with_retry(
            || {
                self.http
                    .post(&url)
                    .header("Authorization", &auth)
                    .header("Accept", "text/event-stream")
                    .json(request)
            },
            &self.retry,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) => {
                let status = response.status().as_u16();
                let body = read_capped_error_body(response).await;
                return Err(TransportError::Http { status, body });
            }
            RetryOutcome::ConnectionError { attempts, source } => {
                return Err(TransportError::Connection { attempts, source });
            }
        };

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::Read))
            .boxed())
    }

    /// GET `/generation?id=...` and return its `data` object, uninterpreted.
    pub async fn fetch_generation(&self, id: &GenerationId) -> Result<Value, TransportError> {
        let url = format!("{}/generation?id={}", self.base_url, encode_query_value(id.as_str()));

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|source| TransportError::Connection {
                attempts: 1,
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_capped_error_body(response).await;
            return Err(TransportError::Http { status, body });
        }

        let mut body: Value = response.json().await.map_err(TransportError::Read)?;
        match body.get_mut("data").map(Value::take) {
            Some(data) if !data.is_null() => Ok(data),
            _ => Err(TransportError::Body(
                "generation response has no `data` object".to_string(),
            )),
        }
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_query_value(raw: &str) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn client_builder() -> reqwest::ClientBuilder {
    use reqwest::header::{HeaderMap, HeaderValue};

    let mut default_headers = HeaderMap::new();
    default_headers.insert("HTTP-Referer", HeaderValue::from_static(APP_REFERER));
    default_headers.insert("X-Title", HeaderValue::from_static(APP_TITLE));

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestParams, build_request};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        build_request(RequestParams::new(
            "openai/gpt-4o-mini",
            vec![json!({"role": "user", "content": "hi"})],
            true,
        ))
        .unwrap()
    }

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend(chunk.unwrap());
        }
        body
    }

    #[tokio::test]
    async fn stream_chat_posts_request_and_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "openai/gpt-4o-mini",
                "stream": true,
                "usage": {"include": true}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: [DONE]\n\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url("sk-test", server.uri()).unwrap();
        let stream = client.stream_chat(&request()).await.unwrap();
        assert_eq!(collect(stream).await, b"data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn http_error_status_returns_capped_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"no key\"}"))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url("bad", server.uri())
            .unwrap()
            .with_retry_config(RetryConfig::disabled());
        let err = client.stream_chat(&request()).await.err().unwrap();
        match err {
            TransportError::Http { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("no key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_generation_returns_data_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/generation"))
            .and(query_param("id", "gen-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"id": "gen-123", "total_cost": 0.0012, "native_tokens_reasoning": 40}
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url("sk-test", server.uri()).unwrap();
        let data = client
            .fetch_generation(&GenerationId::new("gen-123"))
            .await
            .unwrap();
        assert_eq!(data["native_tokens_reasoning"], 40);
    }

    #[test]
    fn query_values_are_percent_encoded() {
        assert_eq!(encode_query_value("gen-123_abc"), "gen-123_abc");
        assert_eq!(encode_query_value("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let client = OpenRouterClient::new("sk-secret").unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
