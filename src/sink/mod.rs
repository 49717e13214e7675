//! Terminal sink drivers (C8): four ways to land a built `Image` — push
//! to a registry, write a Docker-load-compatible tarball, write an OCI
//! image layout directory, or hand the tarball to a local Docker daemon.

pub mod docker_daemon;
pub mod oci_layout;
pub mod registry;
pub mod tarball;

use crate::cache::Cache;
use crate::error::Result;
use crate::image::model::{ContainerConfig, ImageFormat, WrittenLayer};

/// Locates the on-disk bytes for a written layer, trying the application
/// cache first (more likely to need a fresh upload) before the base-image
/// cache.
pub async fn layer_path(
    application_cache: &Cache,
    base_cache: &Cache,
    layer: &WrittenLayer,
) -> Result<std::path::PathBuf> {
    if let Ok(path) = application_cache.blob_path(&layer.blob_digest).await {
        return Ok(path);
    }
    base_cache.blob_path(&layer.blob_digest).await
}

pub fn layer_media_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Docker => crate::image::manifest::MEDIA_TYPE_DOCKER_LAYER,
        ImageFormat::Oci => crate::image::manifest::MEDIA_TYPE_OCI_LAYER,
    }
}

pub fn config_media_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Docker => crate::image::manifest::MEDIA_TYPE_DOCKER_CONFIG,
        ImageFormat::Oci => crate::image::manifest::MEDIA_TYPE_OCI_CONFIG,
    }
}

pub fn manifest_media_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Docker => crate::image::manifest::MEDIA_TYPE_DOCKER_MANIFEST_V2,
        ImageFormat::Oci => crate::image::manifest::MEDIA_TYPE_OCI_MANIFEST,
    }
}

/// Media type for a multi-arch manifest list/index (§4.6), matching the
/// schema of the per-platform manifests it references.
pub fn index_media_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Docker => crate::image::manifest::MEDIA_TYPE_DOCKER_MANIFEST_LIST,
        ImageFormat::Oci => crate::image::manifest::MEDIA_TYPE_OCI_INDEX,
    }
}

/// Serializes the container config to the exact bytes whose digest the
/// manifest's config descriptor must reference (§6 "no reformatting after
/// the digest is computed").
pub fn encode_config(config: &ContainerConfig) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(config)?)
}
