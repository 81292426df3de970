use crate::error::{Error, Result};
use crate::grid::OverrideSet;
use crate::layer::{ConfigLayer, Sections};
use crate::value::ConfigValue;
use std::collections::BTreeMap;

/// Fully merged configuration for one job. Only what the layers (and grid
/// point) supplied is present; nothing is injected by default.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    sections: Sections,
}

/// Section that bare (undotted) grid axis names and override keys land in.
pub const PARAMS_SECTION: &str = "params";

/// Left-fold merge of layers supplied in ascending precedence order. The
/// caller owns the ordering; this never reorders.
pub fn compose(layers: &[ConfigLayer]) -> Result<EffectiveConfig> {
    let mut sections = Sections::new();
    for layer in layers {
        for (section, entries) in &layer.sections {
            for (key, value) in entries {
                merge_key(&mut sections, section, key, value.clone())?;
            }
        }
    }
    Ok(EffectiveConfig { sections })
}

fn merge_key(
    sections: &mut Sections,
    section: &str,
    key: &str,
    value: ConfigValue,
) -> Result<()> {
    let entries = sections.entry(section.to_string()).or_default();
    if let Some(existing) = entries.get(key) {
        // Scalar kinds may replace each other; a list and a scalar at the
        // same path cannot be reconciled and must surface.
        if existing.is_list() != value.is_list() {
            return Err(Error::MergeConflict {
                path: format!("{}.{}", section, key),
                lower: existing.kind_name(),
                upper: value.kind_name(),
            });
        }
    }
    entries.insert(key.to_string(), value);
    Ok(())
}

impl EffectiveConfig {
    /// Merges one grid point on top. Dotted axis names (`section.key`)
    /// target that path; bare names land in the `params` section.
    pub fn apply_overrides(&mut self, overrides: &OverrideSet) -> Result<()> {
        for (axis, value) in &overrides.entries {
            let (section, key) = split_path(axis);
            merge_key(&mut self.sections, section, key, value.clone())?;
        }
        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&ConfigValue> {
        self.sections.get(section)?.get(key)
    }

    /// Dotted lookup; a bare key reads from the `params` section, matching
    /// where bare overrides are written.
    pub fn get_path(&self, path: &str) -> Option<&ConfigValue> {
        let (section, key) = split_path(path);
        self.get(section, key)
    }

    /// Direct write, bypassing merge rules. Used for computed bindings
    /// (job name, assembled command) that the run manager derives.
    pub fn set(&mut self, section: &str, key: &str, value: ConfigValue) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, ConfigValue>> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, ConfigValue>)> {
        self.sections.iter()
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.split_once('.') {
        Some((section, key)) => (section, key),
        None => (PARAMS_SECTION, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerKind;

    fn layer(kind: LayerKind, name: &str, entries: &[(&str, &str, ConfigValue)]) -> ConfigLayer {
        let mut sections = Sections::new();
        for (section, key, value) in entries {
            sections
                .entry(section.to_string())
                .or_default()
                .insert(key.to_string(), value.clone());
        }
        ConfigLayer {
            kind,
            name: name.to_string(),
            sections,
        }
    }

    fn s(v: &str) -> ConfigValue {
        ConfigValue::String(v.to_string())
    }

    #[test]
    fn higher_layer_overwrites_absent_keys_inherit() {
        let cluster = layer(
            LayerKind::Cluster,
            "c",
            &[
                ("slurm", "partition", s("debug")),
                ("slurm", "time", s("00:10:00")),
            ],
        );
        let experiment = layer(
            LayerKind::Experiment,
            "e",
            &[("slurm", "partition", s("gpu"))],
        );
        let merged = compose(&[cluster, experiment]).unwrap();
        assert_eq!(merged.get("slurm", "partition"), Some(&s("gpu")));
        assert_eq!(merged.get("slurm", "time"), Some(&s("00:10:00")));
    }

    #[test]
    fn merge_is_associative() {
        let l1 = layer(LayerKind::Cluster, "c", &[("a", "x", s("1")), ("a", "y", s("1"))]);
        let l2 = layer(LayerKind::Project, "p", &[("a", "y", s("2")), ("b", "z", s("2"))]);
        let l3 = layer(LayerKind::Experiment, "e", &[("b", "z", s("3"))]);

        let all_at_once = compose(&[l1.clone(), l2.clone(), l3.clone()]).unwrap();

        // Group the first two as one step, then fold the third on top.
        let mut grouped = layer(LayerKind::Project, "l12", &[]);
        for src in [&l1, &l2] {
            for (section, entries) in &src.sections {
                for (k, v) in entries {
                    grouped
                        .sections
                        .entry(section.clone())
                        .or_default()
                        .insert(k.clone(), v.clone());
                }
            }
        }
        let stepped = compose(&[grouped, l3]).unwrap();
        assert_eq!(all_at_once, stepped);
    }

    #[test]
    fn lists_replace_wholesale() {
        let lo = layer(
            LayerKind::Cluster,
            "c",
            &[("run", "modules", ConfigValue::List(vec![s("cuda"), s("gcc")]))],
        );
        let hi = layer(
            LayerKind::Experiment,
            "e",
            &[("run", "modules", ConfigValue::List(vec![s("rocm")]))],
        );
        let merged = compose(&[lo, hi]).unwrap();
        assert_eq!(
            merged.get("run", "modules"),
            Some(&ConfigValue::List(vec![s("rocm")]))
        );
    }

    #[test]
    fn list_vs_scalar_conflicts() {
        let lo = layer(LayerKind::Cluster, "c", &[("slurm", "mem", ConfigValue::Int(4))]);
        let hi = layer(
            LayerKind::Experiment,
            "e",
            &[("slurm", "mem", ConfigValue::List(vec![ConfigValue::Int(4)]))],
        );
        match compose(&[lo, hi]) {
            Err(Error::MergeConflict { path, .. }) => assert_eq!(path, "slurm.mem"),
            other => panic!("expected MergeConflict, got {:?}", other),
        }
    }

    #[test]
    fn no_default_injection() {
        let merged = compose(&[layer(LayerKind::Cluster, "c", &[("a", "x", s("1"))])]).unwrap();
        assert!(merged.get("a", "missing").is_none());
        assert!(merged.get("other", "x").is_none());
    }

    #[test]
    fn overrides_target_dotted_paths_and_params() {
        let base = compose(&[layer(
            LayerKind::Experiment,
            "e",
            &[("slurm", "gpus", ConfigValue::Int(1))],
        )])
        .unwrap();
        let mut cfg = base;
        cfg.apply_overrides(&OverrideSet {
            entries: vec![
                ("slurm.gpus".to_string(), ConfigValue::Int(8)),
                ("lr".to_string(), ConfigValue::Float(0.1)),
            ],
        })
        .unwrap();
        assert_eq!(cfg.get("slurm", "gpus"), Some(&ConfigValue::Int(8)));
        assert_eq!(cfg.get_path("lr"), Some(&ConfigValue::Float(0.1)));
        assert_eq!(cfg.get(PARAMS_SECTION, "lr"), Some(&ConfigValue::Float(0.1)));
    }
}
