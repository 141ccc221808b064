// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{FlowConfig, RawFlowConfig};
use crate::errors::Result;

/// Load a flow file from a given path and return the raw `RawFlowConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (graph correctness, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawFlowConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawFlowConfig> {
    let config: RawFlowConfig = toml::from_str(contents)?;
    Ok(config)
}

/// Load a flow file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown or malformed `after` references,
///   - duplicate nodes and reserved characters in step names,
///   - cycles,
///   - optimization parameter types and goal targets,
///   - basic option sanity.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<FlowConfig> {
    let raw_config = load_from_path(&path)?;
    let config = FlowConfig::try_from(raw_config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FlowError;
    use crate::types::{DispatcherKind, NodeId};

    const FLOW: &str = r#"
[option]
design = "gcd"
dispatcher = "slurm"

[option.scheduler]
options = ["--partition=debug"]

[[node]]
step = "syn"
vars = { cmd = "echo syn" }

[[node]]
step = "place"
index = 1
after = ["syn"]
continue = true
vars = { cmd = "echo place" }

[optimize]
measure = ["place:1"]

[[optimize.parameter]]
key = "place_density"
step = "place"
values = [0.7, 0.95]

[[optimize.goal]]
key = "setupslack"
target = "max"
"#;

    #[test]
    fn parses_and_builds_graph() {
        let cfg = FlowConfig::try_from(load_from_str(FLOW).unwrap()).unwrap();
        assert_eq!(cfg.option.design, "gcd");
        assert_eq!(cfg.option.dispatcher, DispatcherKind::Cluster);
        assert_eq!(cfg.option.scheduler.submit, "sbatch");

        let graph = cfg.build_graph();
        let place = NodeId::new("place", 1);
        assert_eq!(graph.dependencies_of(&place), &[NodeId::new("syn", 0)]);
        assert!(graph.spec(&place).unwrap().continue_on_failure);

        let request = cfg.optimize().unwrap();
        assert_eq!(request.measure, vec![place]);
        assert_eq!(request.round_count(), 10);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let raw = load_from_str(
            r#"
[[node]]
step = "place"
after = ["syn"]
"#,
        )
        .unwrap();
        assert!(matches!(FlowConfig::try_from(raw), Err(FlowError::ConfigError(_))));
    }

    #[test]
    fn cycles_are_rejected() {
        let raw = load_from_str(
            r#"
[[node]]
step = "a"
after = ["b"]

[[node]]
step = "b"
after = ["a"]
"#,
        )
        .unwrap();
        assert!(matches!(FlowConfig::try_from(raw), Err(FlowError::Cycle(_))));
    }

    #[test]
    fn unsupported_goal_is_a_validation_error() {
        let raw = load_from_str(&FLOW.replace("target = \"max\"", "target = \"best\"")).unwrap();
        assert!(matches!(FlowConfig::try_from(raw), Err(FlowError::Validation(_))));
    }
}
