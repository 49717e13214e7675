//! Tarball sink (§4.8 "Tarball sink"): a `docker save`-compatible tar —
//! `config.json`, one `<diffid>.tar.gz` per layer, and a top-level
//! `manifest.json`. File order: config first, then layers, then manifest.

use crate::cache::Cache;
use crate::error::Result;
use crate::image::model::Image;
use serde::Serialize;

#[derive(Serialize)]
struct DockerSaveManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "RepoTags")]
    repo_tags: Vec<String>,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

/// Builds the tarball bytes for `image`. `repo_tags` are recorded verbatim
/// in `manifest.json`'s `RepoTags` (e.g. `["myapp:latest"]`); pass an
/// empty slice for an untagged save.
pub async fn build(
    image: &Image,
    repo_tags: &[String],
    application_cache: &Cache,
    base_cache: &Cache,
) -> Result<Vec<u8>> {
    let config_bytes = super::encode_config(&image.config)?;

    let mut layer_files = Vec::with_capacity(image.layers.len());
    for layer in &image.layers {
        let path = super::layer_path(application_cache, base_cache, layer).await?;
        let data = tokio::fs::read(&path).await?;
        layer_files.push((format!("{}.tar.gz", layer.diff_id.hex()), data));
    }

    let manifest_entry = DockerSaveManifestEntry {
        config: "config.json".to_string(),
        repo_tags: repo_tags.to_vec(),
        layers: layer_files.iter().map(|(name, _)| name.clone()).collect(),
    };
    let manifest_bytes = serde_json::to_vec(&vec![manifest_entry])?;

    tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut out);
            builder.mode(tar::HeaderMode::Deterministic);
            append_file(&mut builder, "config.json", &config_bytes)?;
            for (name, data) in &layer_files {
                append_file(&mut builder, name, data)?;
            }
            append_file(&mut builder, "manifest.json", &manifest_bytes)?;
            builder.finish()?;
        }
        Ok(out)
    })
    .await
    .map_err(|e| crate::error::PusherError::Io(format!("tarball build task panicked: {e}")))?
}

fn append_file<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &str,
    data: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_ustar();
    header.set_mode(0o644);
    header.set_mtime(1);
    header.set_size(data.len() as u64);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_path(name)?;
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}
