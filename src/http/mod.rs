//! Retrying HTTP client with TLS-downgrade fallback, cleartext opt-in,
//! and cancellation (C4). Grounded in the teacher's
//! `registry::transport::StandardRegistryTransport`, generalized from a
//! registry-specific transport into a standalone byte-level client the
//! registry layer builds on.

use crate::blob::Blob;
use crate::cancel::CancellationToken;
use crate::config::BuilderConfig;
use crate::error::{is_retryable_status, PusherError, Result};
use crate::output::OutputManager;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
}

impl Method {
    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
        }
    }
}

#[derive(Default, Clone)]
pub struct Request<'a> {
    pub headers: Vec<(String, String)>,
    pub body: Option<&'a Blob>,
    pub content_type: Option<String>,
    pub accept: Vec<String>,
    pub authorization: Option<String>,
}

pub struct Response {
    pub status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: bytes::Bytes,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub struct HttpClient {
    secure: reqwest::Client,
    insecure: reqwest::Client,
    config: BuilderConfig,
    output: OutputManager,
}

const MAX_ATTEMPTS: u32 = 4;

impl HttpClient {
    pub fn new(config: BuilderConfig, output: OutputManager) -> Result<Self> {
        let timeout = Duration::from_millis(config.http_timeout_ms.max(1));
        let secure = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(PusherError::from)?;
        let insecure = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(PusherError::from)?;
        Ok(HttpClient {
            secure,
            insecure,
            config,
            output,
        })
    }

    /// Performs `method url` with retry, TLS downgrade, and cleartext
    /// credential policy applied. `cancel` is checked before each attempt.
    pub async fn call(
        &self,
        method: Method,
        url: &Url,
        request: Request<'_>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let mut attempt = 0u32;
        let mut last_err: PusherError = PusherError::Transport("retries exhausted".into());
        let mut use_insecure = false;
        let mut url = url.clone();

        loop {
            cancel.check()?;
            attempt += 1;

            match self.try_once(method, &url, &request, use_insecure).await {
                Ok(response) => {
                    if is_retryable_status(response.status) && attempt < MAX_ATTEMPTS {
                        last_err = crate::error::map_registry_error(
                            response.status,
                            &crate::error::parse_registry_error_body(&response.body),
                        );
                        self.backoff(attempt).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(PusherError::Transport(msg)) if self.config.allow_insecure_registries => {
                    match decide_retry_action(true, use_insecure, &url, &msg) {
                        RetryAction::DowngradeInsecure => {
                            self.output.warning(&format!(
                                "TLS verification failed for {url}, retrying with verification disabled"
                            ));
                            use_insecure = true;
                            last_err = PusherError::Transport(msg);
                            continue;
                        }
                        RetryAction::DowngradeToHttp => {
                            self.output.warning(&format!(
                                "connection to {url} refused, retrying over plain HTTP"
                            ));
                            let mut downgraded = url.clone();
                            let _ = downgraded.set_scheme("http");
                            let _ = downgraded.set_port(Some(80));
                            url = downgraded;
                            last_err = PusherError::Transport(msg);
                            continue;
                        }
                        RetryAction::Retry => {
                            if attempt >= MAX_ATTEMPTS {
                                return Err(PusherError::Transport(msg));
                            }
                            last_err = PusherError::Transport(msg);
                            self.backoff(attempt).await;
                        }
                        RetryAction::GiveUp => {
                            if attempt >= MAX_ATTEMPTS {
                                return Err(PusherError::Transport(msg));
                            }
                            last_err = PusherError::Transport(msg);
                            self.backoff(attempt).await;
                        }
                    }
                }
                Err(e @ PusherError::NonRetryableRequest) => return Err(e),
                Err(e) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(e);
                    }
                    last_err = e;
                    self.backoff(attempt).await;
                }
            }

            if attempt >= MAX_ATTEMPTS * 2 {
                return Err(last_err);
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        let millis = 100u64 * 2u64.saturating_pow(attempt.min(6));
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    async fn try_once(
        &self,
        method: Method,
        url: &Url,
        request: &Request<'_>,
        use_insecure: bool,
    ) -> Result<Response> {
        let client = if use_insecure { &self.insecure } else { &self.secure };
        let mut builder = client.request(method.to_reqwest(), url.as_str());

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(ct) = &request.content_type {
            builder = builder.header("Content-Type", ct);
        }
        if !request.accept.is_empty() {
            builder = builder.header("Accept", request.accept.join(", "));
        }

        let send_auth = request.authorization.is_some()
            && (url.scheme() == "https" || self.config.send_credentials_over_http);
        if let Some(auth) = &request.authorization {
            if send_auth {
                builder = builder.header("Authorization", auth);
            } else {
                self.output.warning(&format!(
                    "dropping Authorization header for plaintext request to {url}"
                ));
            }
        }

        if let Some(blob) = request.body {
            if !blob.is_retryable() && use_insecure {
                return Err(PusherError::NonRetryableRequest);
            }
            let mut buf = Vec::new();
            blob.stream_to(&mut buf).await?;
            builder = builder.body(buf);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Response { status, headers, body })
    }
}

fn looks_like_tls_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl")
}

fn looks_like_connect_refused(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("connection refused") || lower.contains("connect error")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryAction {
    /// Plain retry on the same scheme/host/port.
    Retry,
    /// TLS handshake failed; retry once against the same URL with
    /// certificate verification disabled.
    DowngradeInsecure,
    /// Connection was refused on the default HTTPS port after an
    /// insecure-TLS retry already happened; fall back to cleartext :80.
    DowngradeToHttp,
    /// Insecure registries aren't allowed; surface the error.
    GiveUp,
}

/// Decides how `HttpClient::call`'s retry loop should react to a transport
/// failure (§5 "TLS downgrade and cleartext fallback"). Factored out of
/// the loop so the downgrade sequence — TLS verification disabled first,
/// then cleartext on port 80 only once that's also failed with a refused
/// connection on the default port — can be exercised without a real
/// socket.
fn decide_retry_action(allow_insecure: bool, already_insecure: bool, url: &Url, message: &str) -> RetryAction {
    if !allow_insecure {
        return RetryAction::GiveUp;
    }
    if !already_insecure && looks_like_tls_failure(message) {
        return RetryAction::DowngradeInsecure;
    }
    if url.scheme() == "https" && url.port().is_none() && looks_like_connect_refused(message) {
        return RetryAction::DowngradeToHttp;
    }
    RetryAction::Retry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn tls_failure_triggers_insecure_downgrade_before_port_fallback() {
        let action = decide_retry_action(true, false, &url("https://registry.example.com/v2/"), "certificate verify failed");
        assert_eq!(action, RetryAction::DowngradeInsecure);
    }

    #[test]
    fn connect_refused_after_insecure_downgrade_falls_back_to_http_on_default_port() {
        let action = decide_retry_action(true, true, &url("https://registry.example.com/v2/"), "connection refused");
        assert_eq!(action, RetryAction::DowngradeToHttp);
    }

    #[test]
    fn connect_refused_on_explicit_port_does_not_downgrade_scheme() {
        let action = decide_retry_action(true, true, &url("https://registry.example.com:5000/v2/"), "connection refused");
        assert_eq!(action, RetryAction::Retry);
    }

    #[test]
    fn insecure_registries_disallowed_gives_up_immediately() {
        let action = decide_retry_action(false, false, &url("https://registry.example.com/v2/"), "certificate verify failed");
        assert_eq!(action, RetryAction::GiveUp);
    }
}
