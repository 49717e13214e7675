//! Image model and JSON wire codecs (C6).

pub mod manifest;
pub mod model;

pub use model::{
    merge_config, BuildPlan, ConfigSection, ContainerConfig, ExposedPort, HistoryEntry, Image,
    ImageFormat, Protocol, RootFs, UnwrittenLayer, WrittenLayer,
};
