// src/exec/shell.rs

//! Generic `shell` tool adapter.
//!
//! Runs `vars.cmd` through `sh -c` with every node variable exported as
//! `FLOW_VAR_<NAME>`. After the run the log is scanned for
//!
//! ```text
//! metric <name> = <value> [unit]
//! ```
//!
//! lines, and lines starting with `error` / `warning` are counted into the
//! `errors` / `warnings` metrics.

use std::collections::BTreeMap;
use std::fs;

use anyhow::Context;
use regex::Regex;
use tracing::{debug, warn};

use crate::errors::{FlowError, Result};
use crate::exec::adapter::{Invocation, NodeTask, ToolAdapter};
use crate::manifest::ManifestStore;

/// Prefix of the environment variables carrying node variables.
pub const VAR_ENV_PREFIX: &str = "FLOW_VAR_";

pub struct ShellAdapter {
    metric_re: Regex,
    error_re: Regex,
    warning_re: Regex,
}

impl ShellAdapter {
    pub fn new() -> Result<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).with_context(|| format!("compiling log pattern {pattern:?}"))
        };
        Ok(Self {
            metric_re: build(
                r"^\s*metric\s+([A-Za-z_][\w.\-]*)\s*=\s*([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)(?:\s+(\S+))?\s*$",
            )?,
            error_re: build(r"(?i)^\s*error\b")?,
            warning_re: build(r"(?i)^\s*warning\b")?,
        })
    }

    /// Metrics found in `log`, in order of appearance (later lines win when
    /// recorded). Values that overflow to infinity are dropped.
    pub fn parse_metrics(&self, log: &str) -> Vec<(String, f64, Option<String>)> {
        let mut metrics = Vec::new();
        for line in log.lines() {
            let Some(caps) = self.metric_re.captures(line) else {
                continue;
            };
            let Ok(value) = caps[2].parse::<f64>() else {
                continue;
            };
            if !value.is_finite() {
                warn!(metric = &caps[1], raw = &caps[2], "ignoring non-finite metric value");
                continue;
            }
            let unit = caps.get(3).map(|m| m.as_str().to_string());
            metrics.push((caps[1].to_string(), value, unit));
        }
        metrics
    }

    /// `(errors, warnings)` line counts.
    pub fn count_diagnostics(&self, log: &str) -> (usize, usize) {
        log.lines().fold((0, 0), |(errors, warnings), line| {
            (
                errors + usize::from(self.error_re.is_match(line)),
                warnings + usize::from(self.warning_re.is_match(line)),
            )
        })
    }
}

impl ToolAdapter for ShellAdapter {
    fn name(&self) -> &str {
        "shell"
    }

    fn setup(&self, task: &NodeTask<'_>) -> Result<Invocation> {
        let cmd = task
            .spec
            .vars
            .get("cmd")
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| FlowError::tool(task.id, "shell tool requires a non-empty `cmd` variable"))?;

        let mut line = cmd.clone();
        for arg in self.runtime_options(task) {
            line.push(' ');
            line.push_str(&arg);
        }

        let env: BTreeMap<String, String> = task
            .spec
            .vars
            .iter()
            .map(|(k, v)| (env_name(k), v.clone()))
            .collect();

        Ok(Invocation::Command {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), line],
            env,
        })
    }

    fn post_process(&self, task: &NodeTask<'_>, manifest: &ManifestStore) -> Result<()> {
        let log_path = task.log_path();
        let log = match fs::read_to_string(&log_path) {
            Ok(log) => log,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        let source = log_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (errors, warnings) = self.count_diagnostics(&log);
        let (step, index) = (task.id.step.as_str(), task.id.index);
        manifest.record_metric(step, index, "errors", errors as f64, &source, None)?;
        manifest.record_metric(step, index, "warnings", warnings as f64, &source, None)?;

        for (name, value, unit) in self.parse_metrics(&log) {
            debug!(node = %task.id, metric = %name, value, "parsed metric from log");
            manifest.record_metric(step, index, &name, value, &source, unit.as_deref())?;
        }
        Ok(())
    }
}

/// `place_density` -> `FLOW_VAR_PLACE_DENSITY`.
pub fn env_name(var: &str) -> String {
    let sanitized: String = var
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{VAR_ENV_PREFIX}{sanitized}")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::dag::NodeSpec;
    use crate::types::NodeId;

    #[test]
    fn parses_metric_lines_with_optional_units() {
        let adapter = ShellAdapter::new().unwrap();
        let log = "\
info: starting
metric cellarea = 1520.5 um^2
metric setupslack = -0.12
metric bogus = fast
  metric holdwns=1e-3 ns
";
        let metrics = adapter.parse_metrics(log);
        assert_eq!(
            metrics,
            vec![
                ("cellarea".to_string(), 1520.5, Some("um^2".to_string())),
                ("setupslack".to_string(), -0.12, None),
                ("holdwns".to_string(), 1e-3, Some("ns".to_string())),
            ]
        );
    }

    #[test]
    fn overflowing_metric_values_are_dropped() {
        let adapter = ShellAdapter::new().unwrap();
        let log = "metric wns = 1e999\nmetric tns = -1e999 ns\nmetric area = 12\n";
        assert_eq!(
            adapter.parse_metrics(log),
            vec![("area".to_string(), 12.0, None)]
        );
    }

    #[test]
    fn counts_errors_and_warnings() {
        let adapter = ShellAdapter::new().unwrap();
        let log = "Warning: floating net\nERROR: no clock\nwarning: x\nno errors here\n";
        assert_eq!(adapter.count_diagnostics(log), (1, 2));
    }

    #[test]
    fn setup_exports_vars_and_appends_args() {
        let adapter = ShellAdapter::new().unwrap();
        let mut spec = NodeSpec::shell("run.sh").with_var("place_density", "0.7");
        spec.args.push("--fast".to_string());
        let id = NodeId::new("place", 0);
        let task = NodeTask {
            id: &id,
            spec: &spec,
            inputs: &[],
            workdir: Path::new("/tmp"),
        };

        let Invocation::Command { program, args, env } = adapter.setup(&task).unwrap() else {
            panic!("expected a command invocation");
        };
        assert_eq!(program, "sh");
        assert_eq!(args, vec!["-c".to_string(), "run.sh --fast".to_string()]);
        assert_eq!(env.get("FLOW_VAR_PLACE_DENSITY").map(String::as_str), Some("0.7"));
    }

    #[test]
    fn missing_cmd_is_a_tool_error() {
        let adapter = ShellAdapter::new().unwrap();
        let spec = NodeSpec::new("shell");
        let id = NodeId::new("syn", 0);
        let task = NodeTask {
            id: &id,
            spec: &spec,
            inputs: &[],
            workdir: Path::new("/tmp"),
        };
        assert!(matches!(
            adapter.setup(&task),
            Err(FlowError::ToolExecution { .. })
        ));
    }
}
