//! Docker Registry V2 / OCI Distribution protocol client (C5).

pub mod auth;
pub mod client;
pub mod reference;

pub use auth::{AuthChallenge, TokenManager};
pub use client::{PulledManifest, RegistryClient, RegistryClientBuilder};
pub use reference::{parse as parse_reference, RefKind, Reference};
