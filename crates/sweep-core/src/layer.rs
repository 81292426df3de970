use crate::error::{Error, Result};
use crate::grid::{GridAxis, GridSpec};
use crate::value::ConfigValue;
use serde_yaml::Value as Yaml;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub type Sections = BTreeMap<String, BTreeMap<String, ConfigValue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Cluster,
    Project,
    Experiment,
    Grid,
}

impl LayerKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            LayerKind::Cluster => "clusters",
            LayerKind::Project => "projects",
            LayerKind::Experiment => "experiments",
            LayerKind::Grid => "grids",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LayerKind::Cluster => "cluster",
            LayerKind::Project => "project",
            LayerKind::Experiment => "experiment",
            LayerKind::Grid => "grid",
        };
        f.write_str(s)
    }
}

/// One named, precedence-ranked configuration document: section -> key ->
/// value, immutable once loaded.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub kind: LayerKind,
    pub name: String,
    pub sections: Sections,
}

/// Reads layer documents from `<root>/{clusters,projects,experiments,grids}/<name>.yaml`.
/// The root is explicit; nothing here consults the environment.
pub struct LayerStore {
    root: PathBuf,
}

impl LayerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, kind: LayerKind, name: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(format!("{}.yaml", name))
    }

    pub fn load(&self, kind: LayerKind, name: &str) -> Result<ConfigLayer> {
        if kind == LayerKind::Grid {
            return Err(Error::SchemaViolation {
                kind,
                name: name.to_string(),
                reason: "grid documents are loaded with load_grid".to_string(),
            });
        }
        let path = self.path_for(kind, name);
        let doc = self.read_document(kind, name, &path)?;
        let sections = parse_sections(&doc, &path)?;
        check_schema(kind, name, &sections)?;
        Ok(ConfigLayer {
            kind,
            name: name.to_string(),
            sections,
        })
    }

    /// A grid document is a flat mapping of axis name -> candidate list,
    /// axis order as written.
    pub fn load_grid(&self, name: &str) -> Result<GridSpec> {
        let kind = LayerKind::Grid;
        let path = self.path_for(kind, name);
        let doc = self.read_document(kind, name, &path)?;
        let mapping = match doc {
            Yaml::Mapping(m) => m,
            _ => {
                return Err(Error::Malformed {
                    path,
                    reason: "grid document must be a mapping of axis name to candidate list"
                        .to_string(),
                })
            }
        };
        let mut axes = Vec::with_capacity(mapping.len());
        for (key, value) in &mapping {
            let axis = match key.as_str() {
                Some(s) => s.to_string(),
                None => {
                    return Err(Error::Malformed {
                        path,
                        reason: "grid axis names must be strings".to_string(),
                    })
                }
            };
            let values = match ConfigValue::from_yaml(value) {
                Ok(ConfigValue::List(items)) => items,
                // A lone scalar reads as a one-candidate axis.
                Ok(scalar) => vec![scalar],
                Err(reason) => {
                    return Err(Error::Malformed {
                        path,
                        reason: format!("axis '{}': {}", axis, reason),
                    })
                }
            };
            axes.push(GridAxis {
                name: axis,
                values,
            });
        }
        if axes.is_empty() {
            return Err(Error::SchemaViolation {
                kind,
                name: name.to_string(),
                reason: "grid must declare at least one axis".to_string(),
            });
        }
        Ok(GridSpec {
            name: name.to_string(),
            axes,
        })
    }

    fn read_document(&self, kind: LayerKind, name: &str, path: &Path) -> Result<Yaml> {
        if !path.exists() {
            return Err(Error::NotFound {
                kind,
                name: name.to_string(),
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(|e| Error::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

fn parse_sections(doc: &Yaml, path: &Path) -> Result<Sections> {
    let mapping = match doc {
        Yaml::Mapping(m) => m,
        _ => {
            return Err(Error::Malformed {
                path: path.to_path_buf(),
                reason: "config document must be a mapping of sections".to_string(),
            })
        }
    };
    let mut sections = Sections::new();
    for (key, value) in mapping {
        let section = key.as_str().ok_or_else(|| Error::Malformed {
            path: path.to_path_buf(),
            reason: "section names must be strings".to_string(),
        })?;
        let body = match value {
            Yaml::Mapping(m) => m,
            _ => {
                return Err(Error::Malformed {
                    path: path.to_path_buf(),
                    reason: format!("section '{}' must be a mapping of keys", section),
                })
            }
        };
        let mut entries = BTreeMap::new();
        for (k, v) in body {
            let key = k.as_str().ok_or_else(|| Error::Malformed {
                path: path.to_path_buf(),
                reason: format!("keys in section '{}' must be strings", section),
            })?;
            let value = ConfigValue::from_yaml(v).map_err(|reason| Error::Malformed {
                path: path.to_path_buf(),
                reason: format!("{}.{}: {}", section, key, reason),
            })?;
            entries.insert(key.to_string(), value);
        }
        sections.insert(section.to_string(), entries);
    }
    Ok(sections)
}

fn check_schema(kind: LayerKind, name: &str, sections: &Sections) -> Result<()> {
    let violation = |reason: String| Error::SchemaViolation {
        kind,
        name: name.to_string(),
        reason,
    };
    match kind {
        LayerKind::Cluster => {
            if !sections.contains_key("slurm") {
                return Err(violation("missing required section 'slurm'".to_string()));
            }
        }
        LayerKind::Experiment => {
            let run = sections
                .get("run")
                .ok_or_else(|| violation("missing required section 'run'".to_string()))?;
            if !run.contains_key("script") {
                return Err(violation("section 'run' must define 'script'".to_string()));
            }
        }
        LayerKind::Project | LayerKind::Grid => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_with(kind_dir: &str, name: &str, body: &str) -> (tempfile::TempDir, LayerStore) {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join(kind_dir);
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(format!("{}.yaml", name)), body).unwrap();
        let store = LayerStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn loads_cluster_layer() {
        let (_dir, store) = store_with(
            "clusters",
            "alpine",
            "slurm:\n  partition: gpu\n  time: \"04:00:00\"\n  gpus: 2\n",
        );
        let layer = store.load(LayerKind::Cluster, "alpine").unwrap();
        assert_eq!(layer.name, "alpine");
        assert_eq!(
            layer.sections["slurm"]["gpus"],
            crate::value::ConfigValue::Int(2)
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LayerStore::new(dir.path());
        match store.load(LayerKind::Cluster, "nope") {
            Err(Error::NotFound { name, .. }) => assert_eq!(name, "nope"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn deep_nesting_is_malformed() {
        let (_dir, store) = store_with("clusters", "bad", "slurm:\n  inner:\n    too: deep\n");
        assert!(matches!(
            store.load(LayerKind::Cluster, "bad"),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn experiment_requires_run_script() {
        let (_dir, store) = store_with("experiments", "bert", "run:\n  batch_size: 32\n");
        assert!(matches!(
            store.load(LayerKind::Experiment, "bert"),
            Err(Error::SchemaViolation { .. })
        ));
    }

    #[test]
    fn grid_axis_order_follows_document() {
        let (_dir, store) = store_with("grids", "lr_sweep", "lr: [0.1, 0.01]\nseed: [1, 2, 3]\n");
        let grid = store.load_grid("lr_sweep").unwrap();
        let names: Vec<&str> = grid.axes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["lr", "seed"]);
        assert_eq!(grid.axes[1].values.len(), 3);
    }

    #[test]
    fn empty_grid_document_violates_schema() {
        let (_dir, store) = store_with("grids", "empty", "{}\n");
        assert!(matches!(
            store.load_grid("empty"),
            Err(Error::SchemaViolation { .. })
        ));
    }

    #[test]
    fn scalar_axis_reads_as_single_candidate() {
        let (_dir, store) = store_with("grids", "fixed", "model: resnet50\n");
        let grid = store.load_grid("fixed").unwrap();
        assert_eq!(grid.axes[0].values.len(), 1);
    }
}
