//! Base-image resolver (C9 §4.9): parse reference, fetch manifest,
//! select platform if it's a list/index, fetch and verify container
//! config, and hand back layer descriptors for the executor to pull.

use crate::cancel::CancellationToken;
use crate::digest::Digest;
use crate::error::{PusherError, Result};
use crate::image::manifest::{self, Descriptor, ManifestEnvelope, MEDIA_TYPE_DOCKER_LAYER};
use crate::image::model::{ContainerConfig, HistoryEntry, RootFs};
use crate::registry::{parse_reference, RegistryClient};

pub struct ResolvedBase {
    pub manifest_digest: Digest,
    pub config: ContainerConfig,
    pub layers: Vec<Descriptor>,
    /// Repository the layers/config were pulled from, so callers can pull
    /// the layer blobs without re-parsing the reference.
    pub repository: String,
}

pub async fn resolve(
    client: &RegistryClient,
    reference: &str,
    architecture: &str,
    os: &str,
    cancel: &CancellationToken,
) -> Result<ResolvedBase> {
    let parsed = parse_reference(reference)?;
    let reference_str = parsed.reference.to_string();

    let pulled = client
        .pull_manifest(&parsed.repository, &reference_str, cancel)
        .await?;
    let envelope = manifest::parse_manifest(&pulled.content_type, &pulled.body)?;

    let (image_manifest, manifest_digest) = match envelope {
        ManifestEnvelope::Docker(m) | ManifestEnvelope::Oci(m) => (m, pulled.digest.clone()),
        ManifestEnvelope::List(list) | ManifestEnvelope::Index(list) => {
            let selected = manifest::select_platform(&list.manifests, architecture, os)?;
            let inner = client
                .pull_manifest(&parsed.repository, &selected.digest.as_str(), cancel)
                .await?;
            let inner_envelope = manifest::parse_manifest(&inner.content_type, &inner.body)?;
            match inner_envelope {
                ManifestEnvelope::Docker(m) | ManifestEnvelope::Oci(m) => (m, selected.digest.clone()),
                _ => {
                    return Err(PusherError::RegistryProtocol(
                        "manifest list entry resolved to another list".into(),
                    ))
                }
            }
        }
        ManifestEnvelope::V1(v1) => {
            return resolve_v1(v1, pulled.digest, parsed.repository, architecture, os);
        }
    };

    let config_bytes = client
        .pull_blob(&parsed.repository, &image_manifest.config.digest, cancel)
        .await?;
    let config: ContainerConfig = serde_json::from_slice(&config_bytes)?;

    if config.architecture != architecture || config.os != os {
        return Err(PusherError::PlatformMismatch {
            architecture: architecture.to_string(),
            os: os.to_string(),
        });
    }

    Ok(ResolvedBase {
        manifest_digest,
        config,
        layers: image_manifest.layers,
        repository: parsed.repository,
    })
}

/// Builds a `ResolvedBase` from a legacy Docker V2.1 manifest (§4.6):
/// there is no separate config blob to pull, so the config comes from
/// the topmost history entry's embedded `v1Compatibility` JSON, and
/// layer sizes are unknown until the blobs are actually pulled (V2.1
/// carries digests only, no declared size).
fn resolve_v1(
    v1: manifest::ManifestV1,
    manifest_digest: Digest,
    repository: String,
    architecture: &str,
    os: &str,
) -> Result<ResolvedBase> {
    let compat = v1.topmost_compatibility()?;

    let resolved_architecture = compat.architecture.clone().unwrap_or_else(|| architecture.to_string());
    let resolved_os = compat.os.clone().unwrap_or_else(|| os.to_string());
    if resolved_architecture != architecture || resolved_os != os {
        return Err(PusherError::PlatformMismatch {
            architecture: architecture.to_string(),
            os: os.to_string(),
        });
    }

    let created = compat
        .created
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH);

    let layer_digests = v1.layer_digests_base_to_top();
    let history = layer_digests
        .iter()
        .map(|_| HistoryEntry {
            created,
            created_by: None,
            empty_layer: false,
        })
        .collect();

    let config = ContainerConfig {
        architecture: resolved_architecture,
        os: resolved_os,
        created,
        config: compat.config.unwrap_or_default(),
        rootfs: RootFs {
            kind: "layers".to_string(),
            diff_ids: Vec::new(),
        },
        history,
    };

    let layers = layer_digests
        .into_iter()
        .map(|digest| Descriptor {
            media_type: MEDIA_TYPE_DOCKER_LAYER.to_string(),
            size: 0,
            digest,
            platform: None,
        })
        .collect();

    Ok(ResolvedBase {
        manifest_digest,
        config,
        layers,
        repository,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::manifest::{FsLayer, ManifestV1, V1History};

    fn v1_manifest(compat_json: &str) -> ManifestV1 {
        ManifestV1 {
            schema_version: 1,
            fs_layers: vec![FsLayer {
                blob_sum: Digest::from_hex("a".repeat(64)).unwrap(),
            }],
            history: vec![V1History {
                v1_compatibility: compat_json.to_string(),
            }],
        }
    }

    #[test]
    fn resolve_v1_builds_config_from_topmost_history_entry() {
        let v1 = v1_manifest(
            r#"{"created":"2016-01-02T15:04:05Z","architecture":"amd64","os":"linux","config":{"Env":["PATH=/usr/bin"],"Cmd":["/bin/sh"]}}"#,
        );
        let digest = Digest::from_hex("b".repeat(64)).unwrap();
        let resolved = resolve_v1(v1, digest.clone(), "library/old".to_string(), "amd64", "linux").unwrap();

        assert_eq!(resolved.manifest_digest, digest);
        assert_eq!(resolved.repository, "library/old");
        assert_eq!(resolved.layers.len(), 1);
        assert_eq!(resolved.config.config.cmd, Some(vec!["/bin/sh".to_string()]));
        assert!(resolved.config.config.env.contains(&"PATH=/usr/bin".to_string()));
    }

    #[test]
    fn resolve_v1_rejects_platform_mismatch() {
        let v1 = v1_manifest(r#"{"architecture":"arm64","os":"linux"}"#);
        let digest = Digest::from_hex("c".repeat(64)).unwrap();
        let err = resolve_v1(v1, digest, "library/old".to_string(), "amd64", "linux").unwrap_err();
        assert!(matches!(err, PusherError::PlatformMismatch { .. }));
    }
}
