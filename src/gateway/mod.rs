//! HTTP gateway to the platform API.
//!
//! One configured client bound to a base address. Every request carries the
//! current access credential in the `auth-token` header when one is
//! available. A 401 or 403 response invokes the unauthorized hook once for
//! that call and is then returned to the caller as
//! [`GatewayError::Unauthorized`]. Nothing is retried.

use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Request header carrying the access credential.
pub const AUTH_HEADER: &str = "auth-token";

/// Supplies the access credential attached to outgoing requests.
pub trait CredentialSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// Called with the failing status when the API rejects the credential.
pub type UnauthorizedHook = Arc<dyn Fn(StatusCode) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("not authorized (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("request failed ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid JSON response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status } | Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::Decode(_) => None,
        }
    }
}

pub struct HttpGateway {
    base_url: String,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialSource>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
            credentials,
            on_unauthorized: None,
        })
    }

    /// Register the hook run on every 401/403 response.
    pub fn on_unauthorized(mut self, hook: UnauthorizedHook) -> Self {
        self.on_unauthorized = Some(hook);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> Result<Value, GatewayError> {
        self.send(Method::GET, path, &[], None).await
    }

    pub async fn get_with_query(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, GatewayError> {
        self.send(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        self.send(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, GatewayError> {
        self.send(Method::DELETE, path, &[], None).await
    }

    /// Send with the credential from the injected [`CredentialSource`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let credential = self.credentials.access_token();
        self.dispatch(method, path, query, body, credential.as_deref())
            .await
    }

    /// Send with an explicit credential (or none).
    pub async fn send_as(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        credential: Option<&str>,
    ) -> Result<Value, GatewayError> {
        self.dispatch(method, path, query, body, credential).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        credential: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let url = join_url(&self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = credential {
            request = request.header(AUTH_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(
                %method,
                path,
                status = status.as_u16(),
                "API rejected the credential"
            );
            if let Some(hook) = &self.on_unauthorized {
                hook(status);
            }
            return Err(GatewayError::Unauthorized {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(%method, path, status = status.as_u16(), "API request failed");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// `base` + `/` + `path`, with exactly one slash between them.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixed(Option<&'static str>);

    impl CredentialSource for Fixed {
        fn access_token(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn gateway(server: &MockServer, token: Option<&'static str>) -> HttpGateway {
        HttpGateway::new(server.uri(), Duration::from_secs(5), Arc::new(Fixed(token))).unwrap()
    }

    fn counting_hook() -> (UnauthorizedHook, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hook: UnauthorizedHook = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (hook, calls)
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("http://h/", "/api/users"), "http://h/api/users");
        assert_eq!(join_url("http://h", "api/users"), "http://h/api/users");
    }

    #[tokio::test]
    async fn attaches_credential_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .and(header(AUTH_HEADER, "secret"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "users": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let body = gateway(&server, Some("secret"))
            .get_with_query("/api/users", &[("page", "2".to_string())])
            .await
            .unwrap();
        assert_eq!(body, json!({ "users": [] }));
    }

    #[tokio::test]
    async fn sends_unauthenticated_without_credential() {
        let server = MockServer::start().await;
        Mock::given(header_exists(AUTH_HEADER))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let body = gateway(&server, None).get("/health").await.unwrap();
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn forbidden_invokes_hook_once_and_still_fails() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/users/7"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let (hook, calls) = counting_hook();
        let gateway = gateway(&server, Some("stale")).on_unauthorized(hook);

        let err = gateway.delete("/api/users/7").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.status(), Some(403));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn each_failing_call_invokes_hook() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (hook, calls) = counting_hook();
        let gateway = gateway(&server, Some("stale")).on_unauthorized(hook);

        assert!(gateway.get("/a").await.is_err());
        assert!(gateway.get("/b").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn server_error_does_not_invoke_hook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/events"))
            .and(body_json(json!({ "title": "Reunion" })))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let (hook, calls) = counting_hook();
        let gateway = gateway(&server, Some("t")).on_unauthorized(hook);

        let err = gateway
            .post("/api/events", &json!({ "title": "Reunion" }))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 500, ref body } if body == "boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_success_body_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let body = gateway(&server, Some("t")).delete("/api/jobs/1").await.unwrap();
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn explicit_credential_overrides_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header(AUTH_HEADER, "explicit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server, Some("ambient"))
            .send_as(Method::GET, "/api/x", &[], None, Some("explicit"))
            .await
            .unwrap();
    }
}
