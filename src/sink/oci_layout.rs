//! OCI image layout sink (§4.8 "OCI layout sink"): a directory containing
//! `oci-layout`, `index.json`, and `blobs/sha256/<hex>` for every blob
//! (config, each layer, manifest) — contents are the exact bytes used to
//! compute their digests.

use crate::cache::Cache;
use crate::digest::Digest;
use crate::error::Result;
use crate::image::manifest::{Descriptor, ImageManifest, MEDIA_TYPE_OCI_INDEX};
use crate::image::model::Image;
use std::path::Path;

const OCI_LAYOUT_CONTENTS: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

pub async fn write(
    image: &Image,
    root: &Path,
    application_cache: &Cache,
    base_cache: &Cache,
) -> Result<()> {
    let blobs_dir = root.join("blobs").join("sha256");
    tokio::fs::create_dir_all(&blobs_dir).await?;

    let mut layer_descriptors = Vec::with_capacity(image.layers.len());
    for layer in &image.layers {
        let path = super::layer_path(application_cache, base_cache, layer).await?;
        let data = tokio::fs::read(&path).await?;
        write_blob(&blobs_dir, &layer.blob_digest, &data).await?;
        layer_descriptors.push(Descriptor {
            media_type: super::layer_media_type(image.format).to_string(),
            size: layer.size,
            digest: layer.blob_digest.clone(),
            platform: None,
        });
    }

    let config_bytes = super::encode_config(&image.config)?;
    let config_digest = Digest::of_bytes(&config_bytes);
    write_blob(&blobs_dir, &config_digest, &config_bytes).await?;

    let manifest = ImageManifest::new_oci(
        Descriptor {
            media_type: super::config_media_type(image.format).to_string(),
            size: config_bytes.len() as u64,
            digest: config_digest,
            platform: None,
        },
        layer_descriptors,
    );
    let manifest_bytes = serde_json::to_vec(&manifest)?;
    let manifest_digest = Digest::of_bytes(&manifest_bytes);
    write_blob(&blobs_dir, &manifest_digest, &manifest_bytes).await?;

    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_INDEX,
        "manifests": [{
            "mediaType": super::manifest_media_type(image.format),
            "size": manifest_bytes.len() as u64,
            "digest": manifest_digest.as_str(),
            "platform": { "architecture": image.config.architecture, "os": image.config.os },
        }],
    });
    tokio::fs::write(root.join("index.json"), serde_json::to_vec(&index)?).await?;
    tokio::fs::write(root.join("oci-layout"), OCI_LAYOUT_CONTENTS).await?;
    Ok(())
}

async fn write_blob(blobs_dir: &Path, digest: &Digest, data: &[u8]) -> Result<()> {
    tokio::fs::write(blobs_dir.join(digest.hex()), data).await?;
    Ok(())
}
