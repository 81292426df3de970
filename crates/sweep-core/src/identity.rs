//! Stable names tying a run and its jobs back to their inputs. Both are
//! pure functions of their arguments, so regeneration reproduces identical
//! identities as long as the grid's cardinality is unchanged.

pub const RUN_NAME_SEPARATOR: &str = "__";
pub const JOB_NAME_PREFIX: &str = "job_";

pub fn run_name(experiment: &str, grid: &str) -> String {
    format!("{}{}{}", experiment, RUN_NAME_SEPARATOR, grid)
}

pub fn job_name(index: usize) -> String {
    format!("{}{}", JOB_NAME_PREFIX, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_name_is_pure() {
        assert_eq!(run_name("bert", "lr_sweep"), "bert__lr_sweep");
        assert_eq!(run_name("bert", "lr_sweep"), run_name("bert", "lr_sweep"));
    }

    #[test]
    fn job_names_are_distinct_and_unpadded() {
        let names: Vec<String> = (0..12).map(job_name).collect();
        assert_eq!(names[0], "job_0");
        assert_eq!(names[10], "job_10");
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
    }
}
