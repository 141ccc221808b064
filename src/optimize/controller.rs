// src/optimize/controller.rs

//! Merged-graph optimization loop.
//!
//! Each round embeds `K` copies of the template under a synthetic `start`
//! node, writes one oracle suggestion into each copy, runs the merged graph
//! once and reports every copy's measurement back to the oracle.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::dag::{FlowGraph, NodeSpec};
use crate::dispatch::Dispatcher;
use crate::engine::run_flow;
use crate::errors::{FlowError, Result};
use crate::exec::FlowContext;
use crate::manifest::ManifestStore;
use crate::optimize::oracle::{Assignment, Completion, Measurement, Oracle, OracleTrial, Suggestion};
use crate::optimize::params::{Goal, Parameter};
use crate::types::NodeId;

/// Step name of the synthetic node every trial copy hangs off.
pub const START_STEP: &str = "start";

/// Experiments per parameter when no budget is configured.
pub const DEFAULT_EXPERIMENTS_PER_PARAMETER: usize = 10;

/// A validated optimization request.
#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub parameters: Vec<Parameter>,
    pub goals: Vec<Goal>,
    /// Total number of trials. Defaults to ten per parameter.
    pub experiments: Option<usize>,
    /// Trials per round. Defaults to 1.
    pub parallel: Option<usize>,
    /// Template nodes whose metrics are measured. Defaults to the
    /// template's exit nodes.
    pub measure: Vec<NodeId>,
    /// Seed for the built-in oracle.
    pub seed: Option<u64>,
}

impl OptimizationRequest {
    pub fn new(parameters: Vec<Parameter>, goals: Vec<Goal>) -> Self {
        Self {
            parameters,
            goals,
            experiments: None,
            parallel: None,
            measure: Vec::new(),
            seed: None,
        }
    }

    pub fn budget(&self) -> usize {
        self.experiments
            .unwrap_or(DEFAULT_EXPERIMENTS_PER_PARAMETER * self.parameters.len())
    }

    pub fn parallel(&self) -> usize {
        self.parallel.unwrap_or(1).max(1)
    }

    pub fn round_count(&self) -> usize {
        round_count(self.budget(), self.parallel())
    }
}

/// `ceil(budget / parallel)`.
pub fn round_count(budget: usize, parallel: usize) -> usize {
    budget.div_ceil(parallel.max(1))
}

/// Outcome of a trial.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialResult {
    Measured(Measurement),
    Infeasible(String),
}

/// One parameterized execution inside a round.
#[derive(Debug, Clone)]
pub struct Trial {
    /// Global trial number.
    pub number: usize,
    pub round: usize,
    /// Namespace of this trial's graph copy.
    pub instance: String,
    /// Job name its history is stored under.
    pub jobname: String,
    pub suggestion_id: u64,
    pub parameters: Assignment,
    pub result: Option<TrialResult>,
}

impl Trial {
    pub fn is_feasible(&self) -> bool {
        matches!(self.result, Some(TrialResult::Measured(_)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptimizationReport {
    pub trials: Vec<Trial>,
    pub optimal: Vec<OracleTrial>,
    pub rounds: usize,
    /// Rounds aborted by an error.
    pub failed_rounds: usize,
}

/// Merged graph of `instances.len()` template copies.
///
/// Returns the graph and, per instance, the namespaced entry nodes of its
/// copy, each of which depends only on `start0`.
pub fn build_merged_graph(
    template: &FlowGraph,
    name: &str,
    instances: &[String],
) -> Result<(FlowGraph, Vec<Vec<NodeId>>)> {
    let mut graph = FlowGraph::new(name);
    let start = graph.add_node(START_STEP, 0, NodeSpec::new("nop"))?;
    let mut entries = Vec::with_capacity(instances.len());
    for instance in instances {
        let copy_entries = graph.embed(template, instance)?;
        for entry in &copy_entries {
            graph.add_edge(&start, entry)?;
        }
        entries.push(copy_entries);
    }
    Ok((graph, entries))
}

pub struct OptimizationController<D: Dispatcher + ?Sized> {
    template: FlowGraph,
    request: OptimizationRequest,
    oracle: Box<dyn Oracle>,
    dispatcher: Arc<D>,
    ctx: FlowContext,
    measure: Vec<NodeId>,
}

impl<D: Dispatcher + ?Sized + 'static> OptimizationController<D> {
    /// Validate the request against the template.
    ///
    /// `ctx` is the parent job: trial histories land in its manifest.
    pub fn new(
        template: FlowGraph,
        request: OptimizationRequest,
        oracle: Box<dyn Oracle>,
        dispatcher: Arc<D>,
        ctx: FlowContext,
    ) -> Result<Self> {
        if request.parameters.is_empty() {
            return Err(FlowError::validation("optimization needs at least one parameter"));
        }
        if request.goals.is_empty() {
            return Err(FlowError::validation("optimization needs at least one goal"));
        }
        if request.parallel == Some(0) {
            return Err(FlowError::validation("optimize.parallel must be >= 1"));
        }
        for param in &request.parameters {
            if let Some(step) = &param.step {
                let found = template
                    .nodes()
                    .any(|id| &id.step == step && param.index.is_none_or(|i| i == id.index));
                if !found {
                    return Err(FlowError::validation(format!(
                        "parameter '{}' targets unknown node {step}{}",
                        param.key,
                        param.index.map(|i| i.to_string()).unwrap_or_default()
                    )));
                }
            }
        }

        let measure = if request.measure.is_empty() {
            template.exit_nodes()
        } else {
            request.measure.clone()
        };
        for id in &measure {
            if !template.contains(id) {
                return Err(FlowError::NodeNotFound(id.clone()));
            }
        }

        Ok(Self {
            template,
            request,
            oracle,
            dispatcher,
            ctx,
            measure,
        })
    }

    pub fn request(&self) -> &OptimizationRequest {
        &self.request
    }

    pub fn round_count(&self) -> usize {
        self.request.round_count()
    }

    /// Run every round, then report the oracle's optimal trials.
    pub async fn run(&mut self) -> Result<OptimizationReport> {
        let rounds = self.round_count();
        let budget = self.request.budget();
        let parallel = self.request.parallel();
        info!(
            job = %self.ctx.jobname,
            rounds, budget, parallel,
            parameters = self.request.parameters.len(),
            "starting optimization"
        );

        let mut report = OptimizationReport {
            rounds,
            ..OptimizationReport::default()
        };

        for round in 0..rounds {
            let count = parallel.min(budget.saturating_sub(report.trials.len()));
            if count == 0 {
                break;
            }
            match self.run_round(round, count, report.trials.len()).await {
                Ok(trials) => report.trials.extend(trials),
                Err((err, trials)) => {
                    error!(round, error = %err, "optimization round failed; continuing");
                    report.failed_rounds += 1;
                    report.trials.extend(trials);
                }
            }
            if let Err(err) = self.ctx.manifest.save(self.ctx.manifest_path()) {
                warn!(round, error = %err, "could not save manifest after round");
            }
        }

        report.optimal = self.oracle.optimal_trials();
        log_optimal(&report.optimal);
        Ok(report)
    }

    /// One merged-graph round. On error the trials created so far are
    /// returned along with it, already reported to the oracle as infeasible.
    async fn run_round(
        &mut self,
        round: usize,
        count: usize,
        first_number: usize,
    ) -> std::result::Result<Vec<Trial>, (FlowError, Vec<Trial>)> {
        let suggestions = self.oracle.suggest(count).map_err(|e| (e, Vec::new()))?;
        let mut trials = self.trials_for(round, first_number, suggestions);

        match self.execute_round(round, &mut trials).await {
            Ok(()) => Ok(trials),
            Err(err) => {
                let reason = format!("round {round} failed: {err}");
                for trial in trials.iter_mut().filter(|t| t.result.is_none()) {
                    trial.result = Some(TrialResult::Infeasible(reason.clone()));
                    if let Err(e) = self
                        .oracle
                        .complete(trial.suggestion_id, Completion::Infeasible(reason.clone()))
                    {
                        warn!(trial = trial.number, error = %e, "oracle rejected completion");
                    }
                }
                Err((err, trials))
            }
        }
    }

    fn trials_for(&self, round: usize, first_number: usize, suggestions: Vec<Suggestion>) -> Vec<Trial> {
        suggestions
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                let number = first_number + i;
                Trial {
                    number,
                    round,
                    instance: format!("trial{number}"),
                    jobname: format!("{}_optimize_{number}", self.ctx.jobname),
                    suggestion_id: s.id,
                    parameters: s.parameters,
                    result: None,
                }
            })
            .collect()
    }

    async fn execute_round(&mut self, round: usize, trials: &mut [Trial]) -> Result<()> {
        let instances: Vec<String> = trials.iter().map(|t| t.instance.clone()).collect();
        let round_job = format!("{}_optimize_round{round}", self.ctx.jobname);
        let (mut graph, _entries) = build_merged_graph(&self.template, &round_job, &instances)?;

        for trial in trials.iter() {
            self.apply_parameters(&mut graph, trial)?;
        }

        let manifest = ManifestStore::for_graph(&self.ctx.design, &round_job, &graph);
        let round_ctx = FlowContext {
            jobname: round_job.clone(),
            manifest: manifest.clone(),
            ..self.ctx.clone()
        };

        info!(round, trials = trials.len(), job = %round_job, "running merged round graph");
        let summary = run_flow(graph, Arc::clone(&self.dispatcher), round_ctx.clone()).await?;
        info!(round, %summary, "round finished");
        if let Err(err) = manifest.save(round_ctx.manifest_path()) {
            warn!(round, error = %err, "could not save round manifest");
        }

        for trial in trials.iter_mut() {
            let completion = match self.measure_trial(&manifest, trial) {
                Ok(measurement) => {
                    info!(trial = trial.number, ?measurement, "trial measured");
                    trial.result = Some(TrialResult::Measured(measurement.clone()));
                    Completion::Measured(measurement)
                }
                Err(reason) => {
                    warn!(trial = trial.number, %reason, "trial infeasible");
                    trial.result = Some(TrialResult::Infeasible(reason.clone()));
                    Completion::Infeasible(reason)
                }
            };
            if let Err(err) = self.oracle.complete(trial.suggestion_id, completion) {
                warn!(trial = trial.number, error = %err, "oracle rejected completion");
                if trial.is_feasible() {
                    let reason = format!("measurement rejected: {err}");
                    trial.result = Some(TrialResult::Infeasible(reason.clone()));
                    if let Err(err) = self
                        .oracle
                        .complete(trial.suggestion_id, Completion::Infeasible(reason))
                    {
                        warn!(trial = trial.number, error = %err, "oracle rejected completion");
                    }
                }
            }

            let snapshot = manifest.snapshot_instance(&trial.jobname, &trial.instance);
            self.ctx.manifest.persist_history(&trial.jobname, snapshot);
        }
        Ok(())
    }

    fn apply_parameters(&self, graph: &mut FlowGraph, trial: &Trial) -> Result<()> {
        for param in &self.request.parameters {
            let Some(value) = trial.parameters.get(&param.key) else {
                continue;
            };
            let targets: Vec<NodeId> = self
                .template
                .nodes()
                .filter(|id| {
                    param.step.as_ref().is_none_or(|s| s == &id.step)
                        && param.index.is_none_or(|i| i == id.index)
                })
                .map(|id| id.namespaced(&trial.instance))
                .collect();
            for id in targets {
                info!(trial = trial.number, node = %id, key = %param.key, %value, "setting parameter");
                graph.set_var(&id, &param.key, value.to_string())?;
            }
        }
        Ok(())
    }

    /// Goal values read from the trial's measurement nodes; the first node
    /// carrying a metric wins. `Err` holds the infeasibility reason.
    fn measure_trial(
        &self,
        manifest: &ManifestStore,
        trial: &Trial,
    ) -> std::result::Result<Measurement, String> {
        let mut measurement = BTreeMap::new();
        for goal in &self.request.goals {
            let value = self
                .measure
                .iter()
                .find_map(|id| manifest.metric(&id.namespaced(&trial.instance), &goal.key));
            match value {
                Some(v) if !v.is_finite() => {
                    return Err(format!("measurement goal '{}' is not finite ({v})", goal.key));
                }
                Some(v) => {
                    measurement.insert(goal.key.clone(), v);
                }
                None => {
                    return Err(format!("did not record measurement goal '{}'", goal.key));
                }
            }
        }
        Ok(measurement)
    }
}

fn log_optimal(optimal: &[OracleTrial]) {
    if optimal.is_empty() {
        warn!("optimization finished without a feasible trial");
    }
    for (n, trial) in optimal.iter().enumerate() {
        info!(n, suggestion = trial.id, "optimal trial");
        for (key, value) in &trial.parameters {
            info!(n, "  {key} = {value}");
        }
        for (key, value) in &trial.measurement {
            info!(n, "  {key} = {value} (measured)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_parameters_without_budget_take_twenty_rounds() {
        let param = |key: &str| Parameter {
            key: key.to_string(),
            domain: crate::optimize::params::Domain::Bool,
            step: None,
            index: None,
        };
        let mut request = OptimizationRequest::new(vec![param("a"), param("b")], vec![]);
        assert_eq!(request.round_count(), 20);
        request.parallel = Some(3);
        assert_eq!(request.round_count(), 7);
        request.experiments = Some(5);
        assert_eq!(request.round_count(), 2);
    }

    #[test]
    fn merged_graph_hangs_every_copy_off_start() {
        let mut template = FlowGraph::new("asic");
        template.add_node("syn", 0, NodeSpec::new("nop")).unwrap();
        template.add_node("place", 0, NodeSpec::new("nop")).unwrap();
        template.edge("syn", "place").unwrap();

        let instances = vec!["trial0".to_string(), "trial1".to_string()];
        let (graph, entries) = build_merged_graph(&template, "round0", &instances).unwrap();

        assert_eq!(graph.len(), 5);
        assert_eq!(graph.entry_nodes(), vec![NodeId::new(START_STEP, 0)]);
        assert_eq!(entries[1], vec![NodeId::new("trial1.syn", 0)]);
        assert_eq!(
            graph.dependencies_of(&NodeId::new("trial1.syn", 0)),
            &[NodeId::new(START_STEP, 0)]
        );
    }
}
