// src/optimize/random.rs

//! Built-in random-search oracle.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::errors::{FlowError, Result};
use crate::optimize::oracle::{
    Assignment, Completion, Oracle, OracleTrial, Suggestion, pareto_front, validate_measurement,
};
use crate::optimize::params::{Domain, Goal, ParamValue, Parameter};

/// Samples every parameter uniformly from its domain and reports the
/// Pareto-optimal set over the goals.
#[derive(Debug)]
pub struct RandomSearch {
    parameters: Vec<Parameter>,
    goals: Vec<Goal>,
    rng: StdRng,
    next_id: u64,
    pending: BTreeMap<u64, Assignment>,
    completed: Vec<OracleTrial>,
    infeasible: BTreeSet<u64>,
}

impl RandomSearch {
    /// A fixed `seed` makes the suggestion sequence reproducible.
    pub fn new(parameters: Vec<Parameter>, goals: Vec<Goal>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            parameters,
            goals,
            rng,
            next_id: 0,
            pending: BTreeMap::new(),
            completed: Vec::new(),
            infeasible: BTreeSet::new(),
        }
    }

    pub fn infeasible_count(&self) -> usize {
        self.infeasible.len()
    }

    fn sample(&mut self, domain: &Domain) -> ParamValue {
        match domain {
            Domain::Float { lo, hi } => ParamValue::Float(self.rng.gen_range(*lo..=*hi)),
            Domain::Int { lo, hi } => ParamValue::Int(self.rng.gen_range(*lo..=*hi)),
            Domain::Discrete(values) => {
                ParamValue::Float(values.choose(&mut self.rng).copied().unwrap_or_default())
            }
            Domain::Bool => ParamValue::Bool(self.rng.gen_bool(0.5)),
            Domain::Enum(values) => {
                ParamValue::Text(values.choose(&mut self.rng).cloned().unwrap_or_default())
            }
        }
    }
}

impl Oracle for RandomSearch {
    fn suggest(&mut self, count: usize) -> Result<Vec<Suggestion>> {
        let domains: Vec<(String, Domain)> = self
            .parameters
            .iter()
            .map(|p| (p.key.clone(), p.domain.clone()))
            .collect();

        let mut suggestions = Vec::with_capacity(count);
        for _ in 0..count {
            let parameters: Assignment = domains
                .iter()
                .map(|(key, domain)| (key.clone(), self.sample(domain)))
                .collect();
            let id = self.next_id;
            self.next_id += 1;
            debug!(suggestion = id, ?parameters, "random search suggestion");
            self.pending.insert(id, parameters.clone());
            suggestions.push(Suggestion { id, parameters });
        }
        Ok(suggestions)
    }

    fn complete(&mut self, id: u64, completion: Completion) -> Result<()> {
        // A rejected measurement leaves the suggestion pending.
        if let Completion::Measured(measurement) = &completion {
            validate_measurement(measurement, &self.goals)?;
        }
        let parameters = self.pending.remove(&id).ok_or_else(|| {
            FlowError::validation(format!("suggestion {id} is unknown or already completed"))
        })?;
        match completion {
            Completion::Measured(measurement) => {
                self.completed.push(OracleTrial {
                    id,
                    parameters,
                    measurement,
                });
            }
            Completion::Infeasible(reason) => {
                debug!(suggestion = id, %reason, "suggestion infeasible");
                self.infeasible.insert(id);
            }
        }
        Ok(())
    }

    fn optimal_trials(&self) -> Vec<OracleTrial> {
        pareto_front(&self.completed, &self.goals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::params::Direction;
    use crate::optimize::oracle::Measurement;

    fn oracle() -> RandomSearch {
        RandomSearch::new(
            vec![
                Parameter {
                    key: "density".into(),
                    domain: Domain::Float { lo: 0.7, hi: 0.95 },
                    step: None,
                    index: None,
                },
                Parameter {
                    key: "diameter".into(),
                    domain: Domain::Int { lo: 10, hi: 100 },
                    step: None,
                    index: None,
                },
            ],
            vec![Goal {
                key: "slack".into(),
                direction: Direction::Maximize,
            }],
            Some(7),
        )
    }

    #[test]
    fn suggestions_stay_inside_their_domains() {
        let mut o = oracle();
        for s in o.suggest(50).unwrap() {
            match &s.parameters["density"] {
                ParamValue::Float(x) => assert!((0.7..=0.95).contains(x)),
                other => panic!("unexpected {other:?}"),
            }
            match &s.parameters["diameter"] {
                ParamValue::Int(x) => assert!((10..=100).contains(x)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn infeasible_trials_are_not_optimal() {
        let mut o = oracle();
        let s = o.suggest(3).unwrap();
        o.complete(s[0].id, Completion::Measured(Measurement::from([("slack".into(), 0.1)])))
            .unwrap();
        o.complete(s[1].id, Completion::Infeasible("no slack".into())).unwrap();
        o.complete(s[2].id, Completion::Measured(Measurement::from([("slack".into(), 0.3)])))
            .unwrap();

        let optimal: Vec<u64> = o.optimal_trials().iter().map(|t| t.id).collect();
        assert_eq!(optimal, vec![s[2].id]);
        assert_eq!(o.infeasible_count(), 1);
        assert!(o.complete(s[0].id, Completion::Infeasible("again".into())).is_err());
    }

    #[test]
    fn rejected_measurement_can_still_be_marked_infeasible() {
        let mut o = oracle();
        let s = o.suggest(1).unwrap();
        let bad = Measurement::from([("slack".into(), f64::INFINITY)]);
        assert!(o.complete(s[0].id, Completion::Measured(bad)).is_err());

        o.complete(s[0].id, Completion::Infeasible("slack overflowed".into())).unwrap();
        assert_eq!(o.infeasible_count(), 1);
        assert!(o.optimal_trials().is_empty());
    }
}
