// src/optimize/oracle.rs

//! Suggest/complete interface to a parameter-search service.

use std::collections::BTreeMap;

use crate::errors::{FlowError, Result};
use crate::optimize::params::{Goal, ParamValue, Parameter};

/// Parameter values keyed by parameter key.
pub type Assignment = BTreeMap<String, ParamValue>;

/// Goal metric values keyed by goal key.
pub type Measurement = BTreeMap<String, f64>;

/// One point proposed by the oracle.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub id: u64,
    pub parameters: Assignment,
}

/// How a suggestion turned out.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Measured(Measurement),
    Infeasible(String),
}

/// A completed, feasible trial as the oracle sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleTrial {
    pub id: u64,
    pub parameters: Assignment,
    pub measurement: Measurement,
}

pub trait Oracle: Send {
    /// Propose up to `count` new points.
    fn suggest(&mut self, count: usize) -> Result<Vec<Suggestion>>;

    /// Report the result of a suggestion.
    fn complete(&mut self, id: u64, completion: Completion) -> Result<()>;

    /// Feasible trials not dominated by any other feasible trial.
    fn optimal_trials(&self) -> Vec<OracleTrial>;
}

/// Whether the built-in search oracle was compiled in (`search` feature).
pub const fn search_available() -> bool {
    cfg!(feature = "search")
}

/// Built-in oracle for `parameters` and `goals`.
///
/// Fails with [`FlowError::OracleUnavailable`] when the crate was built
/// without the `search` feature.
pub fn default_oracle(
    parameters: Vec<Parameter>,
    goals: Vec<Goal>,
    seed: Option<u64>,
) -> Result<Box<dyn Oracle>> {
    #[cfg(feature = "search")]
    {
        Ok(Box::new(crate::optimize::random::RandomSearch::new(
            parameters, goals, seed,
        )))
    }
    #[cfg(not(feature = "search"))]
    {
        let _ = (parameters, goals, seed);
        Err(FlowError::OracleUnavailable(
            "flowdag was built without the `search` feature; rebuild with it enabled or supply an Oracle".to_string(),
        ))
    }
}

/// `a` is at least as good as `b` on every goal and strictly better on one.
pub fn dominates(a: &Measurement, b: &Measurement, goals: &[Goal]) -> bool {
    let mut strictly = false;
    for goal in goals {
        let (Some(&x), Some(&y)) = (a.get(&goal.key), b.get(&goal.key)) else {
            return false;
        };
        if goal.direction.better(y, x) {
            return false;
        }
        if goal.direction.better(x, y) {
            strictly = true;
        }
    }
    strictly
}

/// Pareto-optimal subset of `trials`, in input order.
pub fn pareto_front(trials: &[OracleTrial], goals: &[Goal]) -> Vec<OracleTrial> {
    trials
        .iter()
        .filter(|t| {
            !trials
                .iter()
                .any(|other| other.id != t.id && dominates(&other.measurement, &t.measurement, goals))
        })
        .cloned()
        .collect()
}

/// Check that a measurement covers every goal.
pub fn validate_measurement(measurement: &Measurement, goals: &[Goal]) -> Result<()> {
    for goal in goals {
        match measurement.get(&goal.key) {
            Some(v) if v.is_finite() => {}
            Some(v) => {
                return Err(FlowError::validation(format!(
                    "measurement for '{}' is not finite: {v}",
                    goal.key
                )));
            }
            None => {
                return Err(FlowError::validation(format!(
                    "measurement is missing goal '{}'",
                    goal.key
                )));
            }
        }
    }
    Ok(())
}
