//! In-memory image model: container config + ordered layers + history
//! (C6 §3, §4.6). `BuildPlan` is the external input shape from spec §6.

use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Docker,
    Oci,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// The build plan a caller supplies (spec §6 "Build plan").
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub base_image: String,
    pub architecture: String,
    pub os: String,
    pub creation_time: chrono::DateTime<chrono::Utc>,
    pub format: ImageFormat,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub volumes: BTreeSet<String>,
    pub exposed_ports: BTreeSet<ExposedPort>,
    pub user: Option<String>,
    pub working_directory: Option<String>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub layers: Vec<UnwrittenLayer>,
}

/// "Layer (unwritten)" from spec §3: a finite ordered sequence of file
/// entries plus an optional name.
#[derive(Debug, Clone, Default)]
pub struct UnwrittenLayer {
    pub name: Option<String>,
    pub entries: Vec<crate::tarball::FileEntry>,
}

impl Default for BuildPlan {
    fn default() -> Self {
        BuildPlan {
            base_image: "scratch".to_string(),
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            creation_time: chrono::DateTime::UNIX_EPOCH,
            format: ImageFormat::Docker,
            environment: BTreeMap::new(),
            labels: BTreeMap::new(),
            volumes: BTreeSet::new(),
            exposed_ports: BTreeSet::new(),
            user: None,
            working_directory: None,
            entrypoint: None,
            cmd: None,
            layers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSection {
    #[serde(rename = "Env", skip_serializing_if = "Vec::is_empty", default)]
    pub env: Vec<String>,
    #[serde(rename = "Cmd", skip_serializing_if = "Option::is_none", default)]
    pub cmd: Option<Vec<String>>,
    #[serde(
        rename = "Entrypoint",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "Labels", skip_serializing_if = "BTreeMap::is_empty", default)]
    pub labels: BTreeMap<String, String>,
    #[serde(
        rename = "ExposedPorts",
        skip_serializing_if = "BTreeMap::is_empty",
        default
    )]
    pub exposed_ports: BTreeMap<String, serde_json::Value>,
    #[serde(
        rename = "Volumes",
        skip_serializing_if = "BTreeMap::is_empty",
        default
    )]
    pub volumes: BTreeMap<String, serde_json::Value>,
    #[serde(rename = "User", skip_serializing_if = "Option::is_none", default)]
    pub user: Option<String>,
    #[serde(
        rename = "WorkingDir",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub kind: String,
    pub diff_ids: Vec<Digest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub created: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_by: Option<String>,
    #[serde(rename = "empty_layer", skip_serializing_if = "std::ops::Not::not", default)]
    pub empty_layer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub architecture: String,
    pub os: String,
    pub created: chrono::DateTime<chrono::Utc>,
    pub config: ConfigSection,
    pub rootfs: RootFs,
    pub history: Vec<HistoryEntry>,
}

impl ContainerConfig {
    /// Invariant from spec §3: `|history where !emptyLayer| == |layers|`,
    /// and history order matches layer order.
    pub fn check_invariants(&self) -> bool {
        let non_empty = self.history.iter().filter(|h| !h.empty_layer).count();
        non_empty == self.rootfs.diff_ids.len()
    }
}

/// A written layer: `{blobDigest, diffId, size, contentLocation}` (§3).
/// `source_repository` is set for base layers pulled from a known
/// upstream repository, enabling cross-repo mount (§4.5) when the push
/// target is the same registry; it is `None` for locally built layers.
#[derive(Debug, Clone)]
pub struct WrittenLayer {
    pub blob_digest: Digest,
    pub diff_id: Digest,
    pub size: u64,
    pub content_location: String,
    pub source_repository: Option<String>,
}

/// The fully assembled build output: config + manifest-ready layer list.
pub struct Image {
    pub config: ContainerConfig,
    pub layers: Vec<WrittenLayer>,
    pub format: ImageFormat,
}

/// Merges base-image config with the build plan's overrides (§4.6):
/// `Env`/`Labels` merge with child-wins on key conflict; `ExposedPorts`/
/// `Volumes` union; everything else is override-if-present, else
/// inherited from the base.
pub fn merge_config(base: &ConfigSection, plan: &BuildPlan) -> ConfigSection {
    let mut env_map: BTreeMap<String, String> = base
        .env
        .iter()
        .filter_map(|e| e.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
        .collect();
    for (k, v) in &plan.environment {
        env_map.insert(k.clone(), v.clone());
    }
    let env = env_map.into_iter().map(|(k, v)| format!("{k}={v}")).collect();

    let mut labels = base.labels.clone();
    for (k, v) in &plan.labels {
        labels.insert(k.clone(), v.clone());
    }

    let mut exposed_ports = base.exposed_ports.clone();
    for port in &plan.exposed_ports {
        let key = match port.protocol {
            Protocol::Tcp => format!("{}/tcp", port.port),
            Protocol::Udp => format!("{}/udp", port.port),
        };
        exposed_ports.insert(key, serde_json::json!({}));
    }

    let mut volumes = base.volumes.clone();
    for v in &plan.volumes {
        volumes.insert(v.clone(), serde_json::json!({}));
    }

    ConfigSection {
        env,
        cmd: plan.cmd.clone().or_else(|| base.cmd.clone()),
        entrypoint: plan.entrypoint.clone().or_else(|| base.entrypoint.clone()),
        labels,
        exposed_ports,
        volumes,
        user: plan.user.clone().or_else(|| base.user.clone()),
        working_dir: plan
            .working_directory
            .clone()
            .or_else(|| base.working_dir.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_config_child_env_wins_on_conflict() {
        let base = ConfigSection {
            env: vec!["A=1".into(), "B=2".into()],
            ..Default::default()
        };
        let mut plan = BuildPlan::default();
        plan.environment.insert("B".into(), "override".into());
        plan.environment.insert("C".into(), "3".into());
        let merged = merge_config(&base, &plan);
        assert!(merged.env.contains(&"A=1".to_string()));
        assert!(merged.env.contains(&"B=override".to_string()));
        assert!(merged.env.contains(&"C=3".to_string()));
    }

    #[test]
    fn merge_config_ports_union_instead_of_override() {
        let mut base_ports = BTreeMap::new();
        base_ports.insert("80/tcp".to_string(), serde_json::json!({}));
        let base = ConfigSection {
            exposed_ports: base_ports,
            ..Default::default()
        };
        let mut plan = BuildPlan::default();
        plan.exposed_ports.insert(ExposedPort {
            port: 443,
            protocol: Protocol::Tcp,
        });
        let merged = merge_config(&base, &plan);
        assert!(merged.exposed_ports.contains_key("80/tcp"));
        assert!(merged.exposed_ports.contains_key("443/tcp"));
    }

    #[test]
    fn container_config_invariant_holds_for_matched_history() {
        let config = ContainerConfig {
            architecture: "amd64".into(),
            os: "linux".into(),
            created: chrono::DateTime::UNIX_EPOCH,
            config: ConfigSection::default(),
            rootfs: RootFs {
                kind: "layers".into(),
                diff_ids: vec![Digest::from_hex("a".repeat(64)).unwrap()],
            },
            history: vec![
                HistoryEntry {
                    created: chrono::DateTime::UNIX_EPOCH,
                    created_by: None,
                    empty_layer: true,
                },
                HistoryEntry {
                    created: chrono::DateTime::UNIX_EPOCH,
                    created_by: None,
                    empty_layer: false,
                },
            ],
        };
        assert!(config.check_invariants());
    }
}
