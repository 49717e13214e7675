//! Command line argument parsing and validation (A4).
//!
//! Mirrors the teacher's `src/cli/args.rs`: a `Parser`-derived `Args` with
//! a `Commands` subcommand enum, each variant validated by its own
//! `validate()` before the runner touches the network or filesystem. The
//! four subcommands correspond to the four sinks: `build` writes an OCI
//! image layout directory, `push` lands on a registry, `save` writes a
//! tarball, `load` hands the result to the local Docker daemon.

use crate::error::{PusherError, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "containerize",
    version,
    about = "Build and publish OCI/Docker container images without a Docker daemon"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build the image and write it as an OCI image layout directory
    Build(BuildArgs),
    /// Build the image and push it to a registry
    Push(PushArgs),
    /// Build the image and save it as a docker-load-compatible tarball
    Save(SaveArgs),
    /// Build the image and load it into the local Docker daemon
    Load(LoadArgs),
}

impl Args {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn validate(&self) -> Result<()> {
        match &self.command {
            Some(Commands::Build(a)) => a.validate(),
            Some(Commands::Push(a)) => a.validate(),
            Some(Commands::Save(a)) => a.validate(),
            Some(Commands::Load(a)) => a.validate(),
            None => Err(PusherError::InvalidBuildPlan(
                "no command provided. Use --help for usage information.".into(),
            )),
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum FormatArg {
    Docker,
    Oci,
}

/// Flags shared by all four subcommands: everything needed to assemble a
/// `BuildPlan` and resolve the base image, independent of where the
/// result ends up.
#[derive(ClapArgs, Debug, Clone)]
pub struct CommonBuildArgs {
    /// Base image reference to build from, e.g. "ubuntu:22.04" or "scratch"
    #[arg(long, default_value = "scratch")]
    pub base: String,

    /// Target architecture
    #[arg(long, default_value = "amd64")]
    pub arch: String,

    /// Target OS
    #[arg(long, default_value = "linux")]
    pub os: String,

    /// Manifest/config format to produce
    #[arg(long, value_enum, default_value_t = FormatArg::Docker)]
    pub format: FormatArg,

    /// A local directory to add as a layer, optionally "path:name" (repeatable)
    #[arg(long = "layer", value_name = "DIR[:NAME]")]
    pub layers: Vec<String>,

    /// Environment variable KEY=VALUE (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Image label KEY=VALUE (repeatable)
    #[arg(long = "label", value_name = "KEY=VALUE")]
    pub label: Vec<String>,

    /// Exposed port PORT/PROTO, e.g. 8080/tcp (repeatable)
    #[arg(long = "expose", value_name = "PORT/PROTO")]
    pub expose: Vec<String>,

    /// Declared volume path (repeatable)
    #[arg(long = "volume", value_name = "PATH")]
    pub volume: Vec<String>,

    /// Container user
    #[arg(long)]
    pub user: Option<String>,

    /// Working directory
    #[arg(long = "workdir")]
    pub working_dir: Option<String>,

    /// Entrypoint, comma separated
    #[arg(long, value_delimiter = ',')]
    pub entrypoint: Option<Vec<String>>,

    /// Command, comma separated
    #[arg(long, value_delimiter = ',')]
    pub cmd: Option<Vec<String>>,

    /// Cache directory root
    #[arg(long = "cache-dir", default_value = ".cache")]
    pub cache_dir: PathBuf,

    /// Skip TLS certificate verification and allow cleartext fallback
    #[arg(long)]
    pub skip_tls: bool,

    /// Registry username (paired with --password)
    #[arg(long)]
    pub username: Option<String>,

    /// Registry password (paired with --username)
    #[arg(long)]
    pub password: Option<String>,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "3600")]
    pub timeout: u64,

    /// Bound on concurrent pull/build steps; defaults to min(16, 2*cpu)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl CommonBuildArgs {
    pub fn validate(&self) -> Result<()> {
        if self.base.is_empty() {
            return Err(PusherError::InvalidBuildPlan(
                "base image cannot be empty".into(),
            ));
        }

        if (self.username.is_some() && self.password.is_none())
            || (self.username.is_none() && self.password.is_some())
        {
            return Err(PusherError::InvalidBuildPlan(
                "username and password must be provided together".into(),
            ));
        }

        for layer in &self.layers {
            let (path, _) = split_layer_spec(layer);
            if !std::path::Path::new(path).is_dir() {
                return Err(PusherError::InvalidBuildPlan(format!(
                    "layer source '{path}' is not a directory"
                )));
            }
        }

        for kv in self.env.iter().chain(self.label.iter()) {
            if !kv.contains('=') {
                return Err(PusherError::InvalidBuildPlan(format!(
                    "expected KEY=VALUE, got '{kv}'"
                )));
            }
        }

        Ok(())
    }
}

/// Splits a `--layer` value into its source path and optional layer name.
pub fn split_layer_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.rsplit_once(':') {
        Some((path, name)) if !path.is_empty() => (path, Some(name)),
        _ => (spec, None),
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub common: CommonBuildArgs,

    /// Output directory for the OCI image layout
    #[arg(long, short)]
    pub output: PathBuf,
}

impl BuildArgs {
    pub fn validate(&self) -> Result<()> {
        self.common.validate()
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PushArgs {
    #[command(flatten)]
    pub common: CommonBuildArgs,

    /// Destination reference, e.g. "registry.example.com/myapp:v1"
    #[arg(long, short)]
    pub target: String,
}

impl PushArgs {
    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        if self.target.is_empty() {
            return Err(PusherError::InvalidBuildPlan(
                "push target cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SaveArgs {
    #[command(flatten)]
    pub common: CommonBuildArgs,

    /// Output tarball path
    #[arg(long, short)]
    pub output: PathBuf,

    /// RepoTag to record in manifest.json (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

impl SaveArgs {
    pub fn validate(&self) -> Result<()> {
        self.common.validate()
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct LoadArgs {
    #[command(flatten)]
    pub common: CommonBuildArgs,

    /// RepoTag to record for the loaded image (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

impl LoadArgs {
    pub fn validate(&self) -> Result<()> {
        self.common.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_common() -> CommonBuildArgs {
        CommonBuildArgs {
            base: "scratch".into(),
            arch: "amd64".into(),
            os: "linux".into(),
            format: FormatArg::Docker,
            layers: vec![],
            env: vec![],
            label: vec![],
            expose: vec![],
            volume: vec![],
            user: None,
            working_dir: None,
            entrypoint: None,
            cmd: None,
            cache_dir: PathBuf::from(".cache"),
            skip_tls: false,
            username: None,
            password: None,
            timeout: 3600,
            concurrency: None,
            verbose: false,
        }
    }

    #[test]
    fn rejects_mismatched_credentials() {
        let mut common = sample_common();
        common.username = Some("user".into());
        assert!(common.validate().is_err());
    }

    #[test]
    fn rejects_malformed_env_pair() {
        let mut common = sample_common();
        common.env.push("NOEQUALS".into());
        assert!(common.validate().is_err());
    }

    #[test]
    fn rejects_empty_base() {
        let mut common = sample_common();
        common.base = String::new();
        assert!(common.validate().is_err());
    }

    #[test]
    fn split_layer_spec_with_and_without_name() {
        assert_eq!(split_layer_spec("/tmp/app"), ("/tmp/app", None));
        assert_eq!(split_layer_spec("/tmp/app:code"), ("/tmp/app", Some("code")));
    }

    #[test]
    fn push_args_reject_empty_target() {
        let args = PushArgs {
            common: sample_common(),
            target: String::new(),
        };
        assert!(args.validate().is_err());
    }
}
