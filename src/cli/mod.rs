//! Command line interface (A4): a thin front end over the library's
//! `BuildPlan`/executor. Does not parse build-tool YAML (still out of
//! scope per the base spec).

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::run;
