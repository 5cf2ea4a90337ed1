// THEORY:
// This file is the main entry point for the `espresso_flow` library crate.
// It defines the public API exposed to callers such as the bundled CLI or a web service.
//
// The primary interface is the `ShotAnalyzer` (one shot) and the `BatchAnalyzer` (many
// shots in parallel), together with the data they produce (`ShotReport`, `FeatureVector`,
// labels). The building blocks in `core_modules` stay public for callers that need a
// single stage, e.g. running the `StreamSegmenter` frame by frame for an overlay.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod frame_source;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod record_store;

pub use config::AnalyzerConfig;
pub use error::{FlowError, FlowResult};
pub use parallel_pipeline::{BatchAnalyzer, ShotJob};
pub use pipeline::{ShotAnalysis, ShotAnalyzer, ShotReport};
