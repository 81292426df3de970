use crate::error::{Error, Result};
use crate::layer::LayerKind;
use crate::value::ConfigValue;

#[derive(Debug, Clone)]
pub struct GridAxis {
    pub name: String,
    pub values: Vec<ConfigValue>,
}

/// Named axes of hyperparameter variation, in document order.
#[derive(Debug, Clone)]
pub struct GridSpec {
    pub name: String,
    pub axes: Vec<GridAxis>,
}

impl GridSpec {
    /// Product of axis cardinalities; 1 for a grid with no axes.
    pub fn cardinality(&self) -> Result<usize> {
        let mut total = 1usize;
        for axis in &self.axes {
            if axis.values.is_empty() {
                return Err(Error::EmptyAxis {
                    axis: axis.name.clone(),
                });
            }
            total = total.checked_mul(axis.values.len()).ok_or_else(|| {
                Error::SchemaViolation {
                    kind: LayerKind::Grid,
                    name: self.name.clone(),
                    reason: format!("cardinality overflows at axis '{}'", axis.name),
                }
            })?;
        }
        Ok(total)
    }
}

/// One grid point: exactly one chosen candidate per axis, in axis order.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideSet {
    pub entries: Vec<(String, ConfigValue)>,
}

impl OverrideSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Full Cartesian product in odometer order: axes iterate as written, the
/// rightmost axis varies fastest, so index i is reproducible across runs.
pub fn expand(grid: &GridSpec) -> Result<Vec<OverrideSet>> {
    let total = grid.cardinality()?;
    let mut out = Vec::with_capacity(total);
    for index in 0..total {
        let mut rem = index;
        let mut picks = vec![0usize; grid.axes.len()];
        for (i, axis) in grid.axes.iter().enumerate().rev() {
            picks[i] = rem % axis.values.len();
            rem /= axis.values.len();
        }
        let entries = grid
            .axes
            .iter()
            .zip(&picks)
            .map(|(axis, &pick)| (axis.name.clone(), axis.values[pick].clone()))
            .collect();
        out.push(OverrideSet { entries });
    }
    Ok(out)
}
