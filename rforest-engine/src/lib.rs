//! Host-side persistence, training, and orchestration for the on-device
//! random forest engine. [`embedded_rforest`] is the part of the stack that
//! actually runs on the MCU; everything here needs a real filesystem and is
//! only ever compiled for a host build (the CLI binaries, or a desktop/CI
//! harness exercising the same code the device runs).

pub mod base;
pub mod builder;
pub mod config;
pub mod error;
pub mod forest_container;
pub mod model;
pub mod node_pred;
pub mod pending;
pub mod platform_mem;
pub mod platform_std;
pub mod quantizer;
pub mod sample_store;
pub mod score;
pub mod training;
pub mod tree_store;

pub use error::{EngineError, EngineResult};
pub use model::{PredictionResult, RandomForest};
