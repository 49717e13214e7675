//! JSON wire formats: Docker V2.1 (read-only), Docker V2.2, OCI v1,
//! manifest lists and OCI image indexes (C6 §4.6). Grounded in the
//! teacher's minimal `image::manifest::{Manifest, Layer}`, expanded to
//! the full set of schemas the spec requires.

use crate::digest::Digest;
use crate::error::{PusherError, Result};
use serde::{Deserialize, Serialize};

pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const MEDIA_TYPE_DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const MEDIA_TYPE_OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// Accept-list priority order for manifest pulls (§4.5): OCI manifest,
/// OCI index, Docker V2.2, Docker V2.2 list, Docker V2.1.
pub const ACCEPT_MANIFEST_TYPES: &[&str] = &[
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_DOCKER_MANIFEST_V2,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_DOCKER_MANIFEST_V1,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: Digest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    pub fn new_docker(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        ImageManifest {
            schema_version: 2,
            media_type: MEDIA_TYPE_DOCKER_MANIFEST_V2.to_string(),
            config,
            layers,
        }
    }

    pub fn new_oci(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        ImageManifest {
            schema_version: 2,
            media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
            config,
            layers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestList {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
}

/// Docker V2.1 (`schemaVersion: 1`): legacy, read-only. `history[i]`
/// holds an embedded JSON string (`v1Compatibility`); this crate does not
/// attempt to execute or trust that payload beyond extracting `created`,
/// matching the read-only, best-effort nature spec §4.6 assigns it.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestV1 {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "fsLayers")]
    pub fs_layers: Vec<FsLayer>,
    pub history: Vec<V1History>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FsLayer {
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V1History {
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

impl ManifestV1 {
    /// V2.1 lists layers from topmost to base; reverse to match the
    /// base-to-top ordering the rest of this crate uses.
    pub fn layer_digests_base_to_top(&self) -> Vec<Digest> {
        self.fs_layers
            .iter()
            .rev()
            .map(|l| l.blob_sum.clone())
            .collect()
    }

    /// Parses `history[0]`'s embedded `v1Compatibility` JSON — the
    /// topmost (most recently applied) layer, which is the one Docker's
    /// own V2.1 builder stamps with the final `architecture`/`os`/`config`
    /// for the whole image.
    pub fn topmost_compatibility(&self) -> Result<V1Compatibility> {
        let entry = self
            .history
            .first()
            .ok_or_else(|| PusherError::Parse("V2.1 manifest has no history entries".into()))?;
        serde_json::from_str(&entry.v1_compatibility).map_err(PusherError::from)
    }
}

/// The subset of the `v1Compatibility` embedded JSON this crate trusts:
/// platform and container config. `container_config`/`id`/`parent` and
/// the rest of what a real Docker daemon stamps in there are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct V1Compatibility {
    pub created: Option<String>,
    pub architecture: Option<String>,
    pub os: Option<String>,
    #[serde(default)]
    pub config: Option<crate::image::model::ConfigSection>,
}

pub enum ManifestEnvelope {
    Docker(ImageManifest),
    Oci(ImageManifest),
    List(ManifestList),
    Index(ManifestList),
    V1(ManifestV1),
}

pub fn parse_manifest(content_type: &str, body: &[u8]) -> Result<ManifestEnvelope> {
    match content_type {
        MEDIA_TYPE_DOCKER_MANIFEST_V2 => Ok(ManifestEnvelope::Docker(serde_json::from_slice(body)?)),
        MEDIA_TYPE_OCI_MANIFEST => Ok(ManifestEnvelope::Oci(serde_json::from_slice(body)?)),
        MEDIA_TYPE_DOCKER_MANIFEST_LIST => Ok(ManifestEnvelope::List(serde_json::from_slice(body)?)),
        MEDIA_TYPE_OCI_INDEX => Ok(ManifestEnvelope::Index(serde_json::from_slice(body)?)),
        MEDIA_TYPE_DOCKER_MANIFEST_V1 => Ok(ManifestEnvelope::V1(serde_json::from_slice(body)?)),
        other => Err(PusherError::RegistryProtocol(format!(
            "unsupported manifest media type '{other}'"
        ))),
    }
}

/// Selects the first entry matching `(architecture, os)`, per the Design
/// Notes' resolution of the tie-break open question.
pub fn select_platform<'a>(
    entries: &'a [Descriptor],
    architecture: &str,
    os: &str,
) -> Result<&'a Descriptor> {
    entries
        .iter()
        .find(|d| {
            d.platform
                .as_ref()
                .is_some_and(|p| p.architecture == architecture && p.os == os)
        })
        .ok_or_else(|| PusherError::PlatformMismatch {
            architecture: architecture.to_string(),
            os: os.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(arch: &str, os: &str) -> Descriptor {
        Descriptor {
            media_type: MEDIA_TYPE_DOCKER_MANIFEST_V2.to_string(),
            size: 100,
            digest: Digest::from_hex("a".repeat(64)).unwrap(),
            platform: Some(Platform {
                architecture: arch.to_string(),
                os: os.to_string(),
            }),
        }
    }

    #[test]
    fn manifest_list_selection_picks_matching_platform() {
        let entries = vec![descriptor("amd64", "linux"), descriptor("arm64", "linux")];
        let selected = select_platform(&entries, "amd64", "linux").unwrap();
        assert_eq!(selected.platform.as_ref().unwrap().architecture, "amd64");
    }

    #[test]
    fn manifest_list_selection_fails_with_platform_mismatch() {
        let entries = vec![descriptor("amd64", "linux")];
        let err = select_platform(&entries, "s390x", "linux").unwrap_err();
        assert!(matches!(err, PusherError::PlatformMismatch { .. }));
    }

    #[test]
    fn first_match_wins_on_duplicate_platform_entries() {
        let mut first = descriptor("amd64", "linux");
        first.size = 111;
        let mut second = descriptor("amd64", "linux");
        second.size = 222;
        let entries = vec![first, second];
        let selected = select_platform(&entries, "amd64", "linux").unwrap();
        assert_eq!(selected.size, 111);
    }
}
