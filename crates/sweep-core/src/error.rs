use crate::layer::LayerKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config_not_found: no {kind} config named '{name}' at {path}")]
    NotFound {
        kind: LayerKind,
        name: String,
        path: PathBuf,
    },

    #[error("config_malformed: {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("config_schema_violation: {kind} config '{name}': {reason}")]
    SchemaViolation {
        kind: LayerKind,
        name: String,
        reason: String,
    },

    #[error("merge_conflict: key '{path}' holds {lower} in a lower layer but {upper} in a higher layer")]
    MergeConflict {
        path: String,
        lower: &'static str,
        upper: &'static str,
    },

    #[error("empty_grid_axis: axis '{axis}' has no candidate values")]
    EmptyAxis { axis: String },

    #[error("unresolved_placeholder: template references '{placeholder}' which is absent from the effective config")]
    UnresolvedPlaceholder { placeholder: String },

    #[error("template_error: {reason}")]
    Template { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
