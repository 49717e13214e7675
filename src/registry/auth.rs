//! Bearer-token authentication flow (C5 §4.5). Grounded in the teacher's
//! `registry::auth::Auth` (challenge parsing, token request) and
//! `registry::token_manager::TokenManager` (per-scope caching).

use crate::cancel::CancellationToken;
use crate::credential::{Credential, CredentialProvider};
use crate::error::{PusherError, Result};
use crate::http::{HttpClient, Method, Request};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: String,
    pub scope: String,
}

/// Parses a `WWW-Authenticate: Bearer realm=...,service=...,scope=...`
/// header value.
pub fn parse_auth_challenge(header: &str) -> Option<AuthChallenge> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    let mut scope = None;

    for part in split_challenge_params(rest) {
        let (key, value) = part.split_once('=')?;
        let value = value.trim_matches('"').to_string();
        match key.trim() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            "scope" => scope = Some(value),
            _ => {}
        }
    }

    Some(AuthChallenge {
        realm: realm?,
        service: service.unwrap_or_default(),
        scope: scope.unwrap_or_default(),
    })
}

/// Splits `key="value with, commas",key2=val2` on commas that are
/// outside quotes.
fn split_challenge_params(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[derive(Debug, Clone)]
struct TokenInfo {
    token: String,
}

/// Caches bearer tokens per `(realm, service, scope)`, per spec §4.5.
#[derive(Default)]
pub struct TokenManager {
    cache: RwLock<HashMap<AuthChallenge, TokenInfo>>,
}

impl TokenManager {
    pub fn new() -> Self {
        TokenManager::default()
    }

    pub async fn get_or_fetch(
        &self,
        http: &HttpClient,
        challenge: &AuthChallenge,
        credentials: Option<&Arc<dyn CredentialProvider>>,
        registry_host: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if let Some(info) = self.cache.read().await.get(challenge) {
            return Ok(info.token.clone());
        }

        let token = fetch_token(http, challenge, credentials, registry_host, cancel).await?;
        self.cache.write().await.insert(
            challenge.clone(),
            TokenInfo {
                token: token.clone(),
            },
        );
        Ok(token)
    }

    /// Drops every cached token whose scope matches, forcing the next
    /// request to re-probe and re-fetch. Used when an already-
    /// authenticated request still comes back 401 — the cached token has
    /// expired or been revoked server-side (SPEC_FULL A6's re-probe-after-
    /// 401 retry wrapper). The realm/service aren't known at that call
    /// site, only the scope the failed request authenticated with.
    pub async fn invalidate_matching_scope(&self, scope: &str) {
        self.cache.write().await.retain(|challenge, _| challenge.scope != scope);
    }
}

async fn fetch_token(
    http: &HttpClient,
    challenge: &AuthChallenge,
    credentials: Option<&Arc<dyn CredentialProvider>>,
    registry_host: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut url = Url::parse(&challenge.realm)
        .map_err(|e| PusherError::Authentication(format!("invalid token realm: {e}")))?;
    url.query_pairs_mut().append_pair("service", &challenge.service);
    if !challenge.scope.is_empty() {
        url.query_pairs_mut().append_pair("scope", &challenge.scope);
    }

    let credential = match credentials {
        Some(provider) => provider.resolve(registry_host).await,
        None => None,
    };

    let mut request = Request {
        accept: vec!["application/json".into()],
        ..Default::default()
    };

    let basic_auth;
    match &credential {
        Some(Credential::UserPass { username, password }) => {
            use base64::Engine;
            basic_auth = format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"))
            );
            request.authorization = Some(basic_auth);
        }
        Some(Credential::IdentityToken(token)) => {
            url.query_pairs_mut().append_pair("identity_token", token);
        }
        None => {}
    }

    let response = http.call(Method::Get, &url, request, cancel).await?;
    if response.status != 200 {
        return Err(PusherError::Authentication(format!(
            "token request to {} failed with status {}",
            challenge.realm, response.status
        )));
    }

    #[derive(serde::Deserialize)]
    struct TokenResponse {
        token: Option<String>,
        access_token: Option<String>,
    }

    let parsed: TokenResponse = serde_json::from_slice(&response.body)?;
    parsed
        .token
        .or(parsed.access_token)
        .ok_or_else(|| PusherError::Authentication("token response had no token field".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_challenge() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/ubuntu:pull""#;
        let challenge = parse_auth_challenge(header).unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service, "registry.docker.io");
        assert_eq!(challenge.scope, "repository:library/ubuntu:pull");
    }

    #[test]
    fn rejects_non_bearer_scheme() {
        assert!(parse_auth_challenge("Basic realm=\"x\"").is_none());
    }

    #[tokio::test]
    async fn invalidate_matching_scope_drops_only_that_scope() {
        let manager = TokenManager::new();
        let pull = AuthChallenge {
            realm: "https://auth.example.com/token".into(),
            service: "registry.example.com".into(),
            scope: "repository:app:pull".into(),
        };
        let push = AuthChallenge {
            realm: "https://auth.example.com/token".into(),
            service: "registry.example.com".into(),
            scope: "repository:app:push,pull".into(),
        };
        manager.cache.write().await.insert(pull.clone(), TokenInfo { token: "pull-token".into() });
        manager.cache.write().await.insert(push.clone(), TokenInfo { token: "push-token".into() });

        manager.invalidate_matching_scope(&pull.scope).await;

        assert!(!manager.cache.read().await.contains_key(&pull));
        assert!(manager.cache.read().await.contains_key(&push));
    }
}
