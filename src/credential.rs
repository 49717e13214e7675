//! Credential provider: the narrow external-collaborator boundary from
//! spec §6. Implementations resolve a registry host to a `Credential`;
//! the registry auth flow (C5) never reaches into a credential store
//! directly.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum Credential {
    UserPass { username: String, password: String },
    IdentityToken(String),
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, registry: &str) -> Option<Credential>;
}

/// A fixed, single-registry credential — the common case for a CLI
/// invocation with `--username`/`--password` flags.
pub struct StaticCredential {
    registry: String,
    credential: Credential,
}

impl StaticCredential {
    pub fn new(registry: impl Into<String>, credential: Credential) -> Self {
        StaticCredential {
            registry: registry.into(),
            credential,
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn resolve(&self, registry: &str) -> Option<Credential> {
        if registry == self.registry {
            Some(self.credential.clone())
        } else {
            None
        }
    }
}

/// No credentials at all — anonymous pulls against public repositories.
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn resolve(&self, _registry: &str) -> Option<Credential> {
        None
    }
}
