//! containerize-rs: builds OCI/Docker container images from local files
//! and pushes them to a registry, a Docker daemon, an OCI image layout
//! directory, or a tarball — without a running Docker daemon for the
//! build itself.

pub mod blob;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod credential;
pub mod digest;
pub mod error;
pub mod executor;
pub mod http;
pub mod image;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod sink;
pub mod tarball;

pub use error::{PusherError, Result};
