use crate::grid::GridSpec;
use crate::layer::ConfigLayer;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Content fingerprints over a canonical JSON rendering, so the run
/// manager can detect input drift between generate and submit.

pub fn grid_fingerprint(grid: &GridSpec) -> String {
    let axes: Vec<Value> = grid
        .axes
        .iter()
        .map(|axis| {
            json!({
                "name": axis.name,
                "values": axis.values.iter().map(|v| v.to_json()).collect::<Vec<_>>(),
            })
        })
        .collect();
    digest(&json!({ "grid": grid.name, "axes": axes }))
}

pub fn layers_fingerprint(layers: &[ConfigLayer]) -> String {
    let rendered: Vec<Value> = layers
        .iter()
        .map(|layer| {
            let sections: Value = layer
                .sections
                .iter()
                .map(|(section, entries)| {
                    let body: Value = entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect::<serde_json::Map<_, _>>()
                        .into();
                    (section.clone(), body)
                })
                .collect::<serde_json::Map<_, _>>()
                .into();
            json!({
                "kind": layer.kind.to_string(),
                "name": layer.name,
                "sections": sections,
            })
        })
        .collect();
    digest(&Value::Array(rendered))
}

fn digest(value: &Value) -> String {
    // BTreeMap-backed sections and explicit arrays keep the byte stream
    // canonical without a separate key-sorting pass.
    let bytes = serde_json::to_vec(value).expect("canonical value serializes");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridAxis;
    use crate::value::ConfigValue;

    fn grid(values: &[i64]) -> GridSpec {
        GridSpec {
            name: "g".into(),
            axes: vec![GridAxis {
                name: "lr".into(),
                values: values.iter().map(|v| ConfigValue::Int(*v)).collect(),
            }],
        }
    }

    #[test]
    fn identical_grids_share_a_fingerprint() {
        assert_eq!(grid_fingerprint(&grid(&[1, 2])), grid_fingerprint(&grid(&[1, 2])));
    }

    #[test]
    fn candidate_changes_show_up() {
        assert_ne!(grid_fingerprint(&grid(&[1, 2])), grid_fingerprint(&grid(&[1, 3])));
        assert_ne!(grid_fingerprint(&grid(&[1, 2])), grid_fingerprint(&grid(&[2, 1])));
    }
}
