//! Configuration composition and job generation primitives: layered config
//! documents, deterministic grid expansion, stable job identity, and pure
//! template rendering. Orchestration and submission live in `sweep-runner`.

mod compose;
mod digest;
mod error;
mod grid;
mod identity;
mod layer;
mod template;
mod value;

pub use compose::{compose, EffectiveConfig, PARAMS_SECTION};
pub use digest::{grid_fingerprint, layers_fingerprint};
pub use error::{Error, Result};
pub use grid::{expand, GridAxis, GridSpec, OverrideSet};
pub use identity::{job_name, run_name, JOB_NAME_PREFIX, RUN_NAME_SEPARATOR};
pub use layer::{ConfigLayer, LayerKind, LayerStore, Sections};
pub use template::render;
pub use value::ConfigValue;
