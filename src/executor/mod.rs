//! Step graph executor (C7 §4.7): schedules the canonical build pipeline
//! — authenticate, pull base manifest/config, pull base layers, build
//! application layers, assemble the final image — with bounded
//! concurrency and cooperative cancellation. Pushing (steps 7-10) is
//! sink-specific and lives under `sink::*`, which consumes the `Image`
//! this executor produces.

pub mod progress;

use crate::cache::Cache;
use crate::cancel::CancellationToken;
use crate::digest::Digest;
use crate::error::{PusherError, Result};
use crate::image::model::{merge_config, ContainerConfig, HistoryEntry, Image, RootFs, WrittenLayer};
use crate::image::BuildPlan;
use crate::output::OutputManager;
use crate::registry::RegistryClient;
use crate::resolver::{self, ResolvedBase};
use futures::stream::{FuturesUnordered, StreamExt};
use progress::ProgressTracker;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct BuildExecutor<'a> {
    pub base_client: &'a RegistryClient,
    pub base_cache: &'a Cache,
    pub application_cache: &'a Cache,
    pub max_concurrency: usize,
    pub output: &'a OutputManager,
}

impl<'a> BuildExecutor<'a> {
    pub async fn run(&self, plan: &BuildPlan, cancel: &CancellationToken) -> Result<Image> {
        cancel.check()?;
        self.output.section("resolving base image");
        let base = resolver::resolve(
            self.base_client,
            &plan.base_image,
            &plan.architecture,
            &plan.os,
            cancel,
        )
        .await?;
        self.output
            .detail(&format!("base manifest {}", base.manifest_digest));

        let base_written = self.pull_base_layers(&base, cancel).await?;

        self.output.section("building application layers");
        let app_written = self.build_application_layers(plan, cancel).await?;

        self.output.section("assembling image");
        assemble(plan, base.config, base_written, app_written)
    }

    async fn pull_base_layers(
        &self,
        base: &ResolvedBase,
        cancel: &CancellationToken,
    ) -> Result<Vec<WrittenLayer>> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.max(1)));
        let tracker = Arc::new(ProgressTracker::new());
        for descriptor in &base.layers {
            tracker.register_leaf(descriptor.digest.hex(), descriptor.digest.hex(), descriptor.size);
        }

        let mut tasks = FuturesUnordered::new();
        for descriptor in base.layers.clone() {
            let semaphore = semaphore.clone();
            let tracker = tracker.clone();
            let cancel = cancel.clone();
            let cache = self.base_cache;
            let client = self.base_client;
            let output = self.output;
            let repository = base.repository.clone();

            tasks.push(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| PusherError::Cancelled)?;
                cancel.check()?;

                if cache.contains(&descriptor.digest).await? {
                    let existing = cache.read(&descriptor.digest).await?;
                    tracker.complete(descriptor.digest.hex());
                    return Ok(WrittenLayer {
                        blob_digest: existing.blob_digest,
                        diff_id: existing.diff_id,
                        size: existing.size,
                        content_location: "cache".to_string(),
                        source_repository: Some(repository),
                    });
                }

                let bytes = client.pull_blob(&repository, &descriptor.digest, &cancel).await?;
                let diff_id = diff_id_of_gzip(&bytes)?;
                let entry = cache
                    .write_verified(
                        std::io::Cursor::new(bytes.to_vec()),
                        &descriptor.digest,
                        Some(diff_id),
                    )
                    .await?;
                tracker.complete(descriptor.digest.hex());
                output.detail(&format!("pulled base layer {}", descriptor.digest));
                Ok(WrittenLayer {
                    blob_digest: entry.blob_digest,
                    diff_id: entry.diff_id,
                    size: entry.size,
                    content_location: "cache".to_string(),
                    source_repository: Some(repository),
                })
            });
        }

        let mut results = Vec::with_capacity(base.layers.len());
        while let Some(result) = tasks.next().await {
            results.push(result?);
        }
        tracker.render(self.output, "base layers");
        Ok(results)
    }

    async fn build_application_layers(
        &self,
        plan: &BuildPlan,
        cancel: &CancellationToken,
    ) -> Result<Vec<WrittenLayer>> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.max(1)));
        let mut tasks = FuturesUnordered::new();

        // application layers must preserve declaration order (override
        // semantics depend on it), so each task carries its source index
        // and results are sorted back afterwards.
        for (index, layer) in plan.layers.iter().enumerate() {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let cache = self.application_cache;
            let entries = layer.entries.clone();
            let output = self.output;
            let name = layer.name.clone();

            tasks.push(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| PusherError::Cancelled)?;
                cancel.check()?;
                let built = cache.build_layer(&entries).await?;
                output.detail(&format!(
                    "built layer {} ({} bytes)",
                    name.unwrap_or_else(|| built.blob_digest.hex().to_string()),
                    built.size
                ));
                Ok::<_, PusherError>((
                    index,
                    WrittenLayer {
                        blob_digest: built.blob_digest,
                        diff_id: built.diff_id,
                        size: built.size,
                        content_location: "cache".to_string(),
                        source_repository: None,
                    },
                ))
            });
        }

        let mut indexed = Vec::with_capacity(plan.layers.len());
        while let Some(result) = tasks.next().await {
            indexed.push(result?);
        }
        indexed.sort_by_key(|(i, _)| *i);
        Ok(indexed.into_iter().map(|(_, layer)| layer).collect())
    }
}

fn diff_id_of_gzip(data: &[u8]) -> Result<Digest> {
    use flate2::read::GzDecoder;
    use sha2::{Digest as _, Sha256};
    use std::io::Read;

    let mut decoder = GzDecoder::new(data);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Digest::from_hex(format!("{:x}", hasher.finalize()))
}

fn assemble(
    plan: &BuildPlan,
    base_config: ContainerConfig,
    base_layers: Vec<WrittenLayer>,
    app_layers: Vec<WrittenLayer>,
) -> Result<Image> {
    let merged_config_section = merge_config(&base_config.config, plan);

    let mut diff_ids: Vec<Digest> = base_layers.iter().map(|l| l.diff_id.clone()).collect();
    diff_ids.extend(app_layers.iter().map(|l| l.diff_id.clone()));

    let mut history = base_config.history;
    for layer in &app_layers {
        history.push(HistoryEntry {
            created: plan.creation_time,
            created_by: Some(format!("build layer {}", layer.blob_digest.hex())),
            empty_layer: false,
        });
    }

    let config = ContainerConfig {
        architecture: plan.architecture.clone(),
        os: plan.os.clone(),
        created: plan.creation_time,
        config: merged_config_section,
        rootfs: RootFs {
            kind: "layers".to_string(),
            diff_ids,
        },
        history,
    };

    if !config.check_invariants() {
        return Err(PusherError::InvalidBuildPlan(
            "history/layer count invariant violated during assembly".into(),
        ));
    }

    let mut layers = base_layers;
    layers.extend(app_layers);

    Ok(Image {
        config,
        layers,
        format: plan.format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::BuildPlan;

    fn written_layer(digest_byte: char) -> WrittenLayer {
        let hex = digest_byte.to_string().repeat(64);
        WrittenLayer {
            blob_digest: Digest::from_hex(hex.clone()).unwrap(),
            diff_id: Digest::from_hex(hex).unwrap(),
            size: 10,
            content_location: "cache".into(),
            source_repository: None,
        }
    }

    fn empty_base_config() -> ContainerConfig {
        ContainerConfig {
            architecture: "amd64".into(),
            os: "linux".into(),
            created: chrono::DateTime::UNIX_EPOCH,
            config: crate::image::model::ConfigSection::default(),
            rootfs: RootFs {
                kind: "layers".into(),
                diff_ids: Vec::new(),
            },
            history: Vec::new(),
        }
    }

    /// §8 scenario 3: two independently-shipped layers that each happen to
    /// declare the same path (e.g. `/x`). `assemble` never inspects tar
    /// contents across layers, so both must survive into the final image
    /// rather than being collapsed the way a single tar's later entry would
    /// override an earlier one for the same path.
    #[test]
    fn independently_built_layers_for_the_same_path_stay_unmerged() {
        let plan = BuildPlan::default();
        let base_layers = vec![written_layer('a')];
        let app_layers = vec![written_layer('b')];

        let image = assemble(&plan, empty_base_config(), base_layers, app_layers).unwrap();

        assert_eq!(image.layers.len(), 2);
        assert_eq!(image.layers[0].blob_digest.hex(), "a".repeat(64));
        assert_eq!(image.layers[1].blob_digest.hex(), "b".repeat(64));
        assert_eq!(image.config.rootfs.diff_ids.len(), 2);
    }

    #[test]
    fn assemble_rejects_history_layer_count_mismatch() {
        let plan = BuildPlan::default();
        let mut base_config = empty_base_config();
        base_config.history.push(HistoryEntry {
            created: chrono::DateTime::UNIX_EPOCH,
            created_by: None,
            empty_layer: false,
        });
        // one non-empty history entry already present, but zero layers
        // supplied: invariant (non-empty history count == layer count)
        // must be violated and rejected rather than silently assembled.
        let result = assemble(&plan, base_config, Vec::new(), Vec::new());
        assert!(result.is_err());
    }
}
