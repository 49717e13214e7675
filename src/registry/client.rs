//! Docker Registry V2 / OCI Distribution client (C5). Grounded in the
//! teacher's `registry::client::RegistryClient` (builder, blob upload
//! sequencing, manifest push) and `registry::transport` (typed
//! request/response shapes).

use crate::cancel::CancellationToken;
use crate::credential::CredentialProvider;
use crate::digest::Digest;
use crate::error::{map_registry_error, parse_registry_error_body, PusherError, Result};
use crate::http::{HttpClient, Method, Request, Response};
use crate::image::manifest::ACCEPT_MANIFEST_TYPES;
use crate::output::OutputManager;
use crate::registry::auth::{parse_auth_challenge, AuthChallenge, TokenManager};
use std::sync::Arc;
use url::Url;

pub struct RegistryClientBuilder {
    registry_host: String,
    allow_insecure: bool,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl RegistryClientBuilder {
    pub fn new(registry_host: impl Into<String>) -> Self {
        RegistryClientBuilder {
            registry_host: registry_host.into(),
            allow_insecure: false,
            credentials: None,
        }
    }

    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn build(self, http: Arc<HttpClient>, output: OutputManager) -> RegistryClient {
        RegistryClient {
            registry_host: self.registry_host,
            base_url: format!("https://{}", trim_scheme(&self.registry_host)),
            http,
            token_manager: TokenManager::new(),
            credentials: self.credentials,
            output,
        }
    }
}

fn trim_scheme(host: &str) -> &str {
    host.trim_start_matches("https://").trim_start_matches("http://")
}

pub struct RegistryClient {
    registry_host: String,
    base_url: String,
    http: Arc<HttpClient>,
    token_manager: TokenManager,
    credentials: Option<Arc<dyn CredentialProvider>>,
    output: OutputManager,
}

pub struct PulledManifest {
    pub body: bytes::Bytes,
    pub content_type: String,
    pub digest: Digest,
}

impl RegistryClient {
    fn manifest_url(&self, repository: &str, reference: &str) -> Result<Url> {
        Url::parse(&format!(
            "{}/v2/{}/manifests/{}",
            self.base_url, repository, reference
        ))
        .map_err(PusherError::from)
    }

    fn blob_url(&self, repository: &str, digest: &Digest) -> Result<Url> {
        Url::parse(&format!(
            "{}/v2/{}/blobs/{}",
            self.base_url,
            repository,
            digest.as_str()
        ))
        .map_err(PusherError::from)
    }

    /// `GET /v2/` capability probe; authenticates with `scope` if the
    /// registry challenges with 401.
    async fn authenticate(&self, scope: &str, cancel: &CancellationToken) -> Result<Option<String>> {
        let probe_url = Url::parse(&format!("{}/v2/", self.base_url))?;
        let response = self
            .http
            .call(Method::Get, &probe_url, Request::default(), cancel)
            .await?;

        if response.status == 200 {
            return Ok(None);
        }
        if response.status != 401 {
            return Err(map_registry_error(
                response.status,
                &parse_registry_error_body(&response.body),
            ));
        }

        let header = response
            .header("www-authenticate")
            .ok_or_else(|| PusherError::Authentication("401 with no WWW-Authenticate header".into()))?;
        let mut challenge = parse_auth_challenge(header)
            .ok_or_else(|| PusherError::Authentication(format!("unsupported auth challenge: {header}")))?;
        if challenge.scope.is_empty() {
            challenge.scope = scope.to_string();
        } else {
            challenge = AuthChallenge {
                scope: scope.to_string(),
                ..challenge
            };
        }

        let token = self
            .token_manager
            .get_or_fetch(&self.http, &challenge, self.credentials.as_ref(), &self.registry_host, cancel)
            .await?;
        Ok(Some(token))
    }

    fn bearer(token: &Option<String>) -> Option<String> {
        token.as_ref().map(|t| format!("Bearer {t}"))
    }

    /// Sends `request` and, if the response is a registry 401 on an
    /// already-authenticated request, invalidates the cached token for
    /// `scope` and retries exactly once with a freshly fetched token
    /// (SPEC_FULL A6: "a single retry wrapper around manifest/blob
    /// operations, not just the initial capability probe").
    async fn send_with_reauth(
        &self,
        method: Method,
        url: &Url,
        scope: &str,
        request: Request<'_>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let had_token = request.authorization.is_some();
        let response = self.http.call(method, url, request.clone(), cancel).await?;
        if response.status != 401 || !had_token {
            return Ok(response);
        }

        self.token_manager.invalidate_matching_scope(scope).await;
        let fresh_token = self.authenticate(scope, cancel).await?;
        let mut retried = request;
        retried.authorization = Self::bearer(&fresh_token);
        self.http.call(method, url, retried, cancel).await
    }

    /// Pulls a manifest, following the priority Accept list (§4.5/§4.6).
    /// Does not recurse into manifest lists; callers that need platform
    /// selection do that via `resolver::resolve`.
    pub async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<PulledManifest> {
        let scope = format!("repository:{repository}:pull");
        let token = self.authenticate(&scope, cancel).await?;
        let url = self.manifest_url(repository, reference)?;
        let request = Request {
            accept: ACCEPT_MANIFEST_TYPES.iter().map(|s| s.to_string()).collect(),
            authorization: Self::bearer(&token),
            ..Default::default()
        };
        let response = self.send_with_reauth(Method::Get, &url, &scope, request, cancel).await?;
        if response.status != 200 {
            return Err(map_registry_error(
                response.status,
                &parse_registry_error_body(&response.body),
            ));
        }
        let content_type = response
            .header("content-type")
            .unwrap_or("application/octet-stream")
            .to_string();
        let digest = Digest::of_bytes(&response.body);
        Ok(PulledManifest {
            body: response.body,
            content_type,
            digest,
        })
    }

    pub async fn blob_exists(&self, repository: &str, digest: &Digest, cancel: &CancellationToken) -> Result<bool> {
        let scope = format!("repository:{repository}:pull");
        let token = self.authenticate(&scope, cancel).await?;
        let url = self.blob_url(repository, digest)?;
        let request = Request {
            authorization: Self::bearer(&token),
            ..Default::default()
        };
        let response = self.send_with_reauth(Method::Head, &url, &scope, request, cancel).await?;
        Ok(response.status == 200)
    }

    pub async fn pull_blob(&self, repository: &str, digest: &Digest, cancel: &CancellationToken) -> Result<bytes::Bytes> {
        let scope = format!("repository:{repository}:pull");
        let token = self.authenticate(&scope, cancel).await?;
        let url = self.blob_url(repository, digest)?;
        let request = Request {
            authorization: Self::bearer(&token),
            ..Default::default()
        };
        let response = self.send_with_reauth(Method::Get, &url, &scope, request, cancel).await?;
        if response.status != 200 {
            return Err(map_registry_error(
                response.status,
                &parse_registry_error_body(&response.body),
            ));
        }
        crate::digest::DigestUtils::verify_data_integrity(&response.body, &digest.as_str())?;
        Ok(response.body)
    }

    /// Cross-repository blob mount: `POST .../uploads/?mount=<digest>&from=<source>`.
    /// Returns `true` on 201 (mounted, no bytes transferred), `false` if
    /// the registry declined and a normal upload is required.
    pub async fn try_mount_blob(
        &self,
        target_repository: &str,
        source_repository: &str,
        digest: &Digest,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let scope = format!("repository:{target_repository}:push,pull repository:{source_repository}:pull");
        let token = self.authenticate(&scope, cancel).await?;
        let url = Url::parse(&format!(
            "{}/v2/{}/blobs/uploads/?mount={}&from={}",
            self.base_url,
            target_repository,
            digest.as_str(),
            source_repository
        ))?;
        let request = Request {
            authorization: Self::bearer(&token),
            ..Default::default()
        };
        let response = self.send_with_reauth(Method::Post, &url, &scope, request, cancel).await?;
        Ok(response.status == 201)
    }

    /// Uploads a blob monolithically: `POST uploads/` then `PUT
    /// ?digest=...`. Chunked upload is not attempted here; callers that
    /// need to bound memory for very large layers stream through the
    /// executor's fixed-size chunking (spec §5 backpressure) before
    /// calling this with already-buffered chunks via `upload_blob_chunked`.
    pub async fn upload_blob_monolithic(
        &self,
        repository: &str,
        digest: &Digest,
        data: bytes::Bytes,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let scope = format!("repository:{repository}:push,pull");
        let token = self.authenticate(&scope, cancel).await?;
        let start_url = Url::parse(&format!("{}/v2/{}/blobs/uploads/", self.base_url, repository))?;
        let start = self
            .send_with_reauth(
                Method::Post,
                &start_url,
                &scope,
                Request {
                    authorization: Self::bearer(&token),
                    ..Default::default()
                },
                cancel,
            )
            .await?;
        if start.status != 202 {
            return Err(map_registry_error(start.status, &parse_registry_error_body(&start.body)));
        }
        let location = start
            .header("location")
            .ok_or_else(|| PusherError::RegistryProtocol("upload start had no Location header".into()))?;
        let mut upload_url = resolve_location(&self.base_url, location)?;
        upload_url.query_pairs_mut().append_pair("digest", &digest.as_str());

        let blob = crate::blob::Blob::from_bytes(data);
        let request = Request {
            authorization: Self::bearer(&token),
            content_type: Some("application/octet-stream".into()),
            body: Some(&blob),
            ..Default::default()
        };
        let response = self.send_with_reauth(Method::Put, &upload_url, &scope, request, cancel).await?;
        if response.status != 201 {
            return Err(map_registry_error(
                response.status,
                &parse_registry_error_body(&response.body),
            ));
        }
        Ok(())
    }

    /// Chunked upload: `POST uploads/` then a `PATCH` per chunk, then a
    /// final `PUT ?digest=...` with no body. Used when content length
    /// exceeds the monolithic threshold (§4.5).
    pub async fn upload_blob_chunked(
        &self,
        repository: &str,
        digest: &Digest,
        chunks: &[bytes::Bytes],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let scope = format!("repository:{repository}:push,pull");
        let token = self.authenticate(&scope, cancel).await?;
        let start_url = Url::parse(&format!("{}/v2/{}/blobs/uploads/", self.base_url, repository))?;
        let start = self
            .send_with_reauth(
                Method::Post,
                &start_url,
                &scope,
                Request {
                    authorization: Self::bearer(&token),
                    ..Default::default()
                },
                cancel,
            )
            .await?;
        if start.status != 202 {
            return Err(map_registry_error(start.status, &parse_registry_error_body(&start.body)));
        }
        let mut location = start
            .header("location")
            .ok_or_else(|| PusherError::RegistryProtocol("upload start had no Location header".into()))?
            .to_string();

        for chunk in chunks {
            let url = resolve_location(&self.base_url, &location)?;
            let blob = crate::blob::Blob::from_bytes(chunk.clone());
            let request = Request {
                authorization: Self::bearer(&token),
                content_type: Some("application/octet-stream".into()),
                body: Some(&blob),
                ..Default::default()
            };
            let response = self.send_with_reauth(Method::Patch, &url, &scope, request, cancel).await?;
            if response.status != 202 {
                return Err(map_registry_error(
                    response.status,
                    &parse_registry_error_body(&response.body),
                ));
            }
            location = response
                .header("location")
                .unwrap_or(location.as_str())
                .to_string();
        }

        let mut final_url = resolve_location(&self.base_url, &location)?;
        final_url.query_pairs_mut().append_pair("digest", &digest.as_str());
        let response = self
            .send_with_reauth(
                Method::Put,
                &final_url,
                &scope,
                Request {
                    authorization: Self::bearer(&token),
                    ..Default::default()
                },
                cancel,
            )
            .await?;
        if response.status != 201 {
            return Err(map_registry_error(
                response.status,
                &parse_registry_error_body(&response.body),
            ));
        }
        Ok(())
    }

    pub async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        data: &[u8],
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let scope = format!("repository:{repository}:push,pull");
        let token = self.authenticate(&scope, cancel).await?;
        let url = self.manifest_url(repository, reference)?;
        let blob = crate::blob::Blob::from_bytes(data.to_vec());
        let request = Request {
            authorization: Self::bearer(&token),
            content_type: Some(content_type.to_string()),
            body: Some(&blob),
            ..Default::default()
        };
        let response = self.send_with_reauth(Method::Put, &url, &scope, request, cancel).await?;
        if response.status != 201 {
            return Err(map_registry_error(
                response.status,
                &parse_registry_error_body(&response.body),
            ));
        }
        self.output.detail(&format!("pushed manifest {repository}:{reference}"));
        Ok(())
    }
}

fn resolve_location(base_url: &str, location: &str) -> Result<Url> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Url::parse(location).map_err(PusherError::from)
    } else if let Some(stripped) = location.strip_prefix('/') {
        Url::parse(&format!("{base_url}/{stripped}")).map_err(PusherError::from)
    } else {
        Url::parse(&format!("{base_url}/{location}")).map_err(PusherError::from)
    }
}
