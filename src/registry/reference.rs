//! Image reference parsing: `[registry/]repository[:tag|@digest]` (C5,
//! C9 step 1).

use crate::digest::Digest;
use crate::error::{PusherError, Result};

pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefKind {
    Tag(String),
    Digest(Digest),
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefKind::Tag(t) => write!(f, "{t}"),
            RefKind::Digest(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub reference: RefKind,
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reference {
            RefKind::Tag(t) => write!(f, "{}/{}:{}", self.registry, self.repository, t),
            RefKind::Digest(d) => write!(f, "{}/{}@{}", self.registry, self.repository, d),
        }
    }
}

/// Parses `[registry/]repository[:tag|@digest]`. A bare `docker.io` host
/// is normalized to the canonical `registry-1.docker.io`; a repository
/// with no namespace component against Docker Hub gets the `library/`
/// prefix (SPEC_FULL A6).
pub fn parse(input: &str) -> Result<Reference> {
    if input.is_empty() {
        return Err(PusherError::Reference("empty reference".into()));
    }

    let (before_ref, ref_part) = if let Some(pos) = input.rfind('@') {
        (&input[..pos], Some((&input[pos + 1..], true)))
    } else if let Some(pos) = rfind_tag_colon(input) {
        (&input[..pos], Some((&input[pos + 1..], false)))
    } else {
        (input, None)
    };

    let (registry, repository) = split_registry(before_ref);

    let reference = match ref_part {
        Some((value, is_digest)) if is_digest => RefKind::Digest(Digest::parse(value)?),
        Some((value, _)) => RefKind::Tag(value.to_string()),
        None => RefKind::Tag("latest".to_string()),
    };

    if repository.is_empty() {
        return Err(PusherError::Reference(format!(
            "missing repository in reference '{input}'"
        )));
    }

    Ok(Reference {
        registry,
        repository,
        reference,
    })
}

/// Finds the `:` that introduces a tag, i.e. the last colon after the
/// last slash (so `host:5000/repo` isn't mistaken for a tag separator).
fn rfind_tag_colon(input: &str) -> Option<usize> {
    let last_slash = input.rfind('/');
    let colon = input.rfind(':')?;
    match last_slash {
        Some(slash) if colon < slash => None,
        _ => Some(colon),
    }
}

fn split_registry(input: &str) -> (String, String) {
    if let Some(pos) = input.find('/') {
        let candidate = &input[..pos];
        if looks_like_registry_host(candidate) {
            let registry = normalize_registry(candidate);
            return (registry, input[pos + 1..].to_string());
        }
    }
    let repo = if input.contains('/') {
        input.to_string()
    } else {
        format!("library/{input}")
    };
    (DEFAULT_REGISTRY.to_string(), repo)
}

fn looks_like_registry_host(candidate: &str) -> bool {
    candidate == "localhost" || candidate.contains('.') || candidate.contains(':')
}

fn normalize_registry(host: &str) -> String {
    if host == "docker.io" {
        DEFAULT_REGISTRY.to_string()
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_gets_library_prefix_and_default_registry() {
        let r = parse("ubuntu").unwrap();
        assert_eq!(r.registry, DEFAULT_REGISTRY);
        assert_eq!(r.repository, "library/ubuntu");
        assert_eq!(r.reference, RefKind::Tag("latest".into()));
    }

    #[test]
    fn namespaced_name_keeps_namespace() {
        let r = parse("myorg/myapp:v1").unwrap();
        assert_eq!(r.registry, DEFAULT_REGISTRY);
        assert_eq!(r.repository, "myorg/myapp");
        assert_eq!(r.reference, RefKind::Tag("v1".into()));
    }

    #[test]
    fn explicit_registry_with_port_and_digest() {
        let digest = "sha256:".to_string() + &"a".repeat(64);
        let r = parse(&format!("registry.example.com:5000/a/b@{digest}")).unwrap();
        assert_eq!(r.registry, "registry.example.com:5000");
        assert_eq!(r.repository, "a/b");
        assert_eq!(r.reference, RefKind::Digest(Digest::parse(&digest).unwrap()));
    }

    #[test]
    fn docker_io_alias_normalizes() {
        let r = parse("docker.io/library/ubuntu:latest").unwrap();
        assert_eq!(r.registry, DEFAULT_REGISTRY);
    }
}
