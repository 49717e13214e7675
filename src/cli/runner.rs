//! Application runner that orchestrates build + sink for each subcommand
//! (A4). Grounded in the teacher's `cli::runner::Runner`: print
//! configuration, authenticate, build a client, do the work, report
//! success — generalized from the teacher's single pull/push flow into
//! one `prepare` + `execute` pair shared by all four sinks.

use crate::cache::Cache;
use crate::cancel::CancellationToken;
use crate::config::BuilderConfig;
use crate::credential::{Credential, StaticCredential};
use crate::error::{PusherError, Result};
use crate::executor::BuildExecutor;
use crate::http::HttpClient;
use crate::image::model::{BuildPlan, ExposedPort, Image, ImageFormat, Protocol, UnwrittenLayer};
use crate::output::OutputManager;
use crate::registry::{self, RegistryClient, RegistryClientBuilder};
use crate::sink;
use crate::tarball::FileEntry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use super::args::{Args, BuildArgs, Commands, CommonBuildArgs, FormatArg, LoadArgs, PushArgs, SaveArgs, split_layer_spec};

pub async fn run(args: Args) -> Result<()> {
    args.validate()?;
    match args.command.expect("validated above") {
        Commands::Build(a) => run_build(a).await,
        Commands::Push(a) => run_push(a).await,
        Commands::Save(a) => run_save(a).await,
        Commands::Load(a) => run_load(a).await,
    }
}

/// Everything the four subcommands share: the resolved build plan, the
/// client/caches needed to run the executor, and the output sink.
struct Prepared {
    output: OutputManager,
    plan: BuildPlan,
    http: Arc<HttpClient>,
    builder_config: BuilderConfig,
    base_client: RegistryClient,
    base_cache: Cache,
    application_cache: Cache,
    cancel: CancellationToken,
}

async fn prepare(common: &CommonBuildArgs) -> Result<Prepared> {
    let output = OutputManager::new(common.verbose);
    output.section("preparing build");

    let mut builder_config = BuilderConfig::default().with_cache_root(&common.cache_dir);
    builder_config.allow_insecure_registries = common.skip_tls;
    builder_config.http_timeout_ms = common.timeout.saturating_mul(1000).max(1);
    if let Some(concurrency) = common.concurrency {
        builder_config.max_concurrency = concurrency.max(1);
    }

    let http = Arc::new(HttpClient::new(builder_config.clone(), output.clone())?);

    let parsed_base = registry::parse_reference(&common.base)?;
    let mut base_builder = RegistryClientBuilder::new(parsed_base.registry.clone())
        .allow_insecure(builder_config.allow_insecure_registries);
    if let (Some(username), Some(password)) = (&common.username, &common.password) {
        base_builder = base_builder.credentials(Arc::new(StaticCredential::new(
            parsed_base.registry.clone(),
            Credential::UserPass {
                username: username.clone(),
                password: password.clone(),
            },
        )));
    }
    let base_client = base_builder.build(http.clone(), output.clone());

    let base_cache = Cache::new(&builder_config.base_image_cache_dir);
    let application_cache = Cache::new(&builder_config.application_cache_dir);

    let plan = build_plan(common)?;
    output.detail(&format!(
        "base {} -> {}/{}, {} layer(s)",
        common.base,
        common.arch,
        common.os,
        plan.layers.len()
    ));

    Ok(Prepared {
        output,
        plan,
        http,
        builder_config,
        base_client,
        base_cache,
        application_cache,
        cancel: CancellationToken::new(),
    })
}

async fn execute(prepared: &Prepared) -> Result<Image> {
    let executor = BuildExecutor {
        base_client: &prepared.base_client,
        base_cache: &prepared.base_cache,
        application_cache: &prepared.application_cache,
        max_concurrency: prepared.builder_config.effective_concurrency(),
        output: &prepared.output,
    };
    executor.run(&prepared.plan, &prepared.cancel).await
}

async fn run_build(args: BuildArgs) -> Result<()> {
    let prepared = prepare(&args.common).await?;
    let image = execute(&prepared).await?;
    sink::oci_layout::write(
        &image,
        &args.output,
        &prepared.application_cache,
        &prepared.base_cache,
    )
    .await?;
    prepared
        .output
        .success(&format!("wrote OCI image layout to {}", args.output.display()));
    Ok(())
}

async fn run_push(args: PushArgs) -> Result<()> {
    let prepared = prepare(&args.common).await?;
    let image = execute(&prepared).await?;

    let parsed_target = registry::parse_reference(&args.target)?;
    let mut target_builder = RegistryClientBuilder::new(parsed_target.registry.clone())
        .allow_insecure(prepared.builder_config.allow_insecure_registries);
    if let (Some(username), Some(password)) = (&args.common.username, &args.common.password) {
        target_builder = target_builder.credentials(Arc::new(StaticCredential::new(
            parsed_target.registry.clone(),
            Credential::UserPass {
                username: username.clone(),
                password: password.clone(),
            },
        )));
    }
    let target_client = target_builder.build(prepared.http.clone(), prepared.output.clone());

    sink::registry::push(
        &image,
        &target_client,
        &parsed_target.repository,
        &parsed_target.reference.to_string(),
        &prepared.application_cache,
        &prepared.base_cache,
        &prepared.cancel,
    )
    .await?;

    prepared.output.success(&format!("pushed {}", args.target));
    Ok(())
}

async fn run_save(args: SaveArgs) -> Result<()> {
    let prepared = prepare(&args.common).await?;
    let image = execute(&prepared).await?;
    let bytes = sink::tarball::build(
        &image,
        &args.tags,
        &prepared.application_cache,
        &prepared.base_cache,
    )
    .await?;
    tokio::fs::write(&args.output, bytes).await?;
    prepared
        .output
        .success(&format!("saved tarball to {}", args.output.display()));
    Ok(())
}

async fn run_load(args: LoadArgs) -> Result<()> {
    let prepared = prepare(&args.common).await?;
    let image = execute(&prepared).await?;
    let loaded_id = sink::docker_daemon::load(
        &image,
        &args.tags,
        &prepared.application_cache,
        &prepared.base_cache,
    )
    .await?;
    prepared
        .output
        .success(&format!("loaded into docker daemon: {loaded_id}"));
    Ok(())
}

fn build_plan(common: &CommonBuildArgs) -> Result<BuildPlan> {
    let mut plan = BuildPlan {
        base_image: common.base.clone(),
        architecture: common.arch.clone(),
        os: common.os.clone(),
        creation_time: chrono::Utc::now(),
        format: match common.format {
            FormatArg::Docker => ImageFormat::Docker,
            FormatArg::Oci => ImageFormat::Oci,
        },
        environment: BTreeMap::new(),
        labels: BTreeMap::new(),
        volumes: BTreeSet::new(),
        exposed_ports: BTreeSet::new(),
        user: common.user.clone(),
        working_directory: common.working_dir.clone(),
        entrypoint: common.entrypoint.clone(),
        cmd: common.cmd.clone(),
        layers: Vec::new(),
    };

    for kv in &common.env {
        let (k, v) = kv
            .split_once('=')
            .ok_or_else(|| PusherError::InvalidBuildPlan(format!("expected KEY=VALUE, got '{kv}'")))?;
        plan.environment.insert(k.to_string(), v.to_string());
    }
    for kv in &common.label {
        let (k, v) = kv
            .split_once('=')
            .ok_or_else(|| PusherError::InvalidBuildPlan(format!("expected KEY=VALUE, got '{kv}'")))?;
        plan.labels.insert(k.to_string(), v.to_string());
    }
    for volume in &common.volume {
        plan.volumes.insert(volume.clone());
    }
    for expose in &common.expose {
        plan.exposed_ports.insert(parse_exposed_port(expose)?);
    }
    for layer_spec in &common.layers {
        let (path, name) = split_layer_spec(layer_spec);
        let entries = collect_directory_entries(Path::new(path))?;
        plan.layers.push(UnwrittenLayer {
            name: name.map(|s| s.to_string()),
            entries,
        });
    }

    Ok(plan)
}

fn parse_exposed_port(spec: &str) -> Result<ExposedPort> {
    let (port_str, proto_str) = spec.split_once('/').unwrap_or((spec, "tcp"));
    let port: u16 = port_str
        .parse()
        .map_err(|_| PusherError::InvalidBuildPlan(format!("invalid exposed port '{spec}'")))?;
    let protocol = match proto_str {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        other => {
            return Err(PusherError::InvalidBuildPlan(format!(
                "invalid protocol '{other}' in '{spec}'"
            )))
        }
    };
    Ok(ExposedPort { port, protocol })
}

/// Walks `root` recursively and builds a `FileEntry` per file, rooted at
/// "/" the way a build context's files land at the image root. Unix file
/// mode bits are carried over from the source; other platforms get the
/// tarball module's default file mode.
fn collect_directory_entries(root: &Path) -> Result<Vec<FileEntry>> {
    let mut out = Vec::new();
    walk_directory(root, root, &mut out)?;
    Ok(out)
}

fn walk_directory(base: &Path, dir: &Path, out: &mut Vec<FileEntry>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path.strip_prefix(base).expect("path under base by construction");
        let extraction_path = format!("/{}", relative.to_string_lossy());
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_directory(base, &path, out)?;
        } else {
            out.push(FileEntry::file(extraction_path, path).with_mode(file_mode(&metadata)));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    crate::tarball::DEFAULT_FILE_MODE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_exposed_port_defaults_to_tcp() {
        let port = parse_exposed_port("8080").unwrap();
        assert_eq!(port.port, 8080);
        assert_eq!(port.protocol, Protocol::Tcp);
    }

    #[test]
    fn parse_exposed_port_accepts_udp() {
        let port = parse_exposed_port("53/udp").unwrap();
        assert_eq!(port.port, 53);
        assert_eq!(port.protocol, Protocol::Udp);
    }

    #[test]
    fn parse_exposed_port_rejects_garbage() {
        assert!(parse_exposed_port("not-a-port").is_err());
        assert!(parse_exposed_port("80/sctp").is_err());
    }

    #[tokio::test]
    async fn collect_directory_entries_finds_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/file.txt"), b"hi").unwrap();

        let entries = collect_directory_entries(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].extraction_path, "/sub/file.txt");
    }
}
