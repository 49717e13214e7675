//! Docker daemon sink (§4.8 "Docker daemon sink" / §6 "Docker daemon
//! loader"): builds the same tarball the tarball sink produces, writes it
//! to a temp file, then hands it to the external `docker load`
//! collaborator. Loading is blocking and its failure (including stderr)
//! is surfaced, matching §6's "load(tarPath) -> imageId; blocking, may
//! log stderr; failure is surfaced".

use crate::cache::Cache;
use crate::error::{PusherError, Result};
use crate::image::model::Image;
use uuid::Uuid;

pub async fn load(
    image: &Image,
    repo_tags: &[String],
    application_cache: &Cache,
    base_cache: &Cache,
) -> Result<String> {
    let tar_bytes = super::tarball::build(image, repo_tags, application_cache, base_cache).await?;

    let temp_path = std::env::temp_dir().join(format!("containerize-{}.tar", Uuid::new_v4()));
    tokio::fs::write(&temp_path, &tar_bytes).await?;
    let result = run_docker_load(&temp_path).await;
    let _ = tokio::fs::remove_file(&temp_path).await;
    result
}

async fn run_docker_load(tar_path: &std::path::Path) -> Result<String> {
    let output = tokio::process::Command::new("docker")
        .arg("load")
        .arg("--input")
        .arg(tar_path)
        .output()
        .await
        .map_err(|e| PusherError::Io(format!("failed to spawn docker load: {e}")))?;

    if !output.status.success() {
        return Err(PusherError::RegistryProtocol(format!(
            "docker load failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_loaded_id(&stdout)
}

/// `docker load` prints `Loaded image: <ref>` or `Loaded image ID:
/// sha256:<hex>` on success; extract whichever trailing value it printed.
fn parse_loaded_id(stdout: &str) -> Result<String> {
    const PREFIXES: &[&str] = &["Loaded image ID: ", "Loaded image: "];
    stdout
        .lines()
        .rev()
        .find_map(|line| {
            PREFIXES
                .iter()
                .find_map(|prefix| line.strip_prefix(prefix))
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PusherError::RegistryProtocol("docker load produced no recognizable output".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loaded_image_line() {
        let id = parse_loaded_id("Loaded image: myapp:latest\n").unwrap();
        assert_eq!(id, "myapp:latest");
    }
}
