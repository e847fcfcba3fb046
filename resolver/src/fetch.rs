use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{Duration, sleep};

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRIES: u32 = 3;

const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
    StatusCode::TOO_MANY_REQUESTS,     // 429
    StatusCode::INTERNAL_SERVER_ERROR, // 500
    StatusCode::BAD_GATEWAY,           // 502
    StatusCode::SERVICE_UNAVAILABLE,   // 503
    StatusCode::GATEWAY_TIMEOUT,       // 504
];

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("feature endpoint returned {0}")]
    Status(StatusCode),
    #[error("feature endpoint unavailable, last status {0}")]
    RetriesExceeded(StatusCode),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Retrieves the raw feature payload. The payload is handed to the resolver
/// as-is; validating its shape is the resolver's job.
#[async_trait]
pub trait FlagSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError>;
}

/// Fetches the payload with a GET request, retrying transient failures.
pub struct HttpFlagSource {
    client: reqwest::Client,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpFlagSource {
    pub fn new() -> Self {
        HttpFlagSource::with_retries(MAX_RETRIES, BASE_DELAY)
    }

    pub fn with_retries(max_retries: u32, base_delay: Duration) -> Self {
        HttpFlagSource {
            client: reqwest::Client::new(),
            max_retries,
            base_delay,
        }
    }
}

impl Default for HttpFlagSource {
    fn default() -> Self {
        HttpFlagSource::new()
    }
}

#[async_trait]
impl FlagSource for HttpFlagSource {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let url = Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let mut retries = 0;

        loop {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response.json::<Value>().await?);
            }

            if !RETRIABLE_STATUS_CODES.contains(&status) {
                return Err(FetchError::Status(status));
            }
            if retries >= self.max_retries {
                return Err(FetchError::RetriesExceeded(status));
            }

            let delay = backoff_delay(self.base_delay, retries);
            tracing::debug!(%status, ?delay, "retrying feature fetch");
            sleep(delay).await;
            retries += 1;
        }
    }
}

/// Exponential backoff. Saturates instead of overflowing for large retry counts.
fn backoff_delay(base: Duration, retries: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(retries))
}

/// Reads the payload from the local file named by a `file://` URL.
pub struct FileFlagSource;

#[async_trait]
impl FlagSource for FileFlagSource {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        let path = Url::parse(url)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;

        let contents = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

/// Picks the file source for `file://` URLs and the HTTP source for everything else.
pub fn source_for_url(url: &str) -> Arc<dyn FlagSource> {
    if url.starts_with("file://") {
        Arc::new(FileFlagSource)
    } else {
        Arc::new(HttpFlagSource::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_source() -> HttpFlagSource {
        HttpFlagSource::with_retries(2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_http_fetch_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/features.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"name": "dark-mode", "enabled": true}]"#,
            ))
            .mount(&mock_server)
            .await;

        let url = format!("{}/features.json", mock_server.uri());
        let payload = fast_source().fetch(&url).await.unwrap();
        assert_eq!(payload, json!([{"name": "dark-mode", "enabled": true}]));
    }

    #[tokio::test]
    async fn test_http_retries_transient_failures() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/features.json"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/features.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .with_priority(2)
            .mount(&mock_server)
            .await;

        let url = format!("{}/features.json", mock_server.uri());
        let payload = fast_source().fetch(&url).await.unwrap();
        assert_eq!(payload, json!([]));
    }

    #[tokio::test]
    async fn test_http_retries_exhausted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&mock_server)
            .await;

        let url = format!("{}/features.json", mock_server.uri());
        let result = fast_source().fetch(&url).await;
        assert!(matches!(
            result,
            Err(FetchError::RetriesExceeded(StatusCode::BAD_GATEWAY))
        ));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/features.json", mock_server.uri());
        let err = fast_source().fetch(&url).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_http_invalid_url() {
        let result = fast_source().fetch("not a url").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 32), base * u32::MAX);
        assert_eq!(backoff_delay(base, u32::MAX), base * u32::MAX);
        assert_eq!(backoff_delay(Duration::MAX, 1), Duration::MAX);
    }

    #[tokio::test]
    async fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "beta", "enabled": false}}]"#).unwrap();
        let url = Url::from_file_path(file.path()).unwrap();

        let source = source_for_url(url.as_str());
        let payload = source.fetch(url.as_str()).await.unwrap();
        assert_eq!(payload, json!([{"name": "beta", "enabled": false}]));
    }

    #[tokio::test]
    async fn test_file_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Url::from_file_path(dir.path().join("missing.json")).unwrap();
        assert!(matches!(
            FileFlagSource.fetch(missing.as_str()).await,
            Err(FetchError::Io(_))
        ));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let broken = Url::from_file_path(&path).unwrap();
        assert!(matches!(
            FileFlagSource.fetch(broken.as_str()).await,
            Err(FetchError::Json(_))
        ));

        assert!(matches!(
            FileFlagSource.fetch("https://flags.example.com").await,
            Err(FetchError::InvalidUrl(_))
        ));
    }
}
