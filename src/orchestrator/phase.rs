use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use anyhow::anyhow;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info, warn};

use super::error::StackError;
use super::graph::PhasePlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Nothing in the phase was enabled. Counts as satisfied for dependents.
    Skipped,
}

impl PhaseState {
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, PhaseState::Succeeded | PhaseState::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseMode {
    /// All steps start together; the phase ends when every step has finished.
    Parallel,
    /// Steps run one after another; the first failure ends the phase.
    Sequential,
}

/// One unit of work inside a phase. Nothing runs until the phase polls it.
pub struct Step {
    pub name: String,
    pub optional: bool,
    fut: BoxFuture<'static, Result<(), StackError>>,
}

impl Step {
    pub fn required<F>(name: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = Result<(), StackError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            optional: false,
            fut: Box::pin(fut),
        }
    }

    /// A step whose missing binary or missing tool only skips the step.
    pub fn optional<F>(name: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = Result<(), StackError>> + Send + 'static,
    {
        Self {
            optional: true,
            ..Self::required(name, fut)
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("optional", &self.optional)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct PhaseDescriptor {
    pub name: String,
    pub depends_on: BTreeSet<String>,
    pub mode: PhaseMode,
    pub steps: Vec<Step>,
}

impl PhaseDescriptor {
    pub fn new(name: impl Into<String>, mode: PhaseMode) -> Self {
        Self {
            name: name.into(),
            depends_on: BTreeSet::new(),
            mode,
            steps: Vec::new(),
        }
    }

    pub fn after(mut self, phase: &str) -> Self {
        self.depends_on.insert(phase.to_string());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}

/// Outcome of a single phase.
#[derive(Debug)]
pub struct PhaseReport {
    pub name: String,
    pub state: PhaseState,
    pub completed: Vec<String>,
    /// Optional steps that were skipped because their tool was unavailable.
    pub skipped: Vec<String>,
    /// The first fatal step error, when the phase failed.
    pub error: Option<StackError>,
}

impl PhaseReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: PhaseState::Running,
            completed: Vec::new(),
            skipped: Vec::new(),
            error: None,
        }
    }

    /// Fold one step outcome in. Returns false when the outcome fails the phase.
    fn record(&mut self, step: &str, optional: bool, result: Result<(), StackError>) -> bool {
        match result {
            Ok(()) => {
                self.completed.push(step.to_string());
                true
            }
            Err(e) if optional && e.is_skippable() => {
                warn!(phase = %self.name, step = %step, "skipping optional step: {}", e);
                self.skipped.push(step.to_string());
                true
            }
            Err(e) => {
                if self.error.is_none() {
                    error!(phase = %self.name, step = %step, "step failed: {:#}", e);
                    self.error = Some(e);
                } else {
                    warn!(phase = %self.name, step = %step, "step also failed: {:#}", e);
                }
                false
            }
        }
    }
}

/// Execute every step of one phase according to its mode.
pub async fn run_phase(phase: PhaseDescriptor) -> PhaseReport {
    let mut report = PhaseReport::new(&phase.name);

    if phase.steps.is_empty() {
        info!(phase = %phase.name, "nothing enabled, skipping phase");
        report.state = PhaseState::Skipped;
        return report;
    }

    match phase.mode {
        PhaseMode::Parallel => {
            let mut pending: FuturesUnordered<_> = phase
                .steps
                .into_iter()
                .map(|step| async move {
                    let result = step.fut.await;
                    (step.name, step.optional, result)
                })
                .collect();

            // Siblings of a failed step are left to finish.
            while let Some((name, optional, result)) = pending.next().await {
                report.record(&name, optional, result);
            }
        }
        PhaseMode::Sequential => {
            for step in phase.steps {
                let result = step.fut.await;
                if !report.record(&step.name, step.optional, result) {
                    break;
                }
            }
        }
    }

    report.state = if report.error.is_some() {
        PhaseState::Failed
    } else {
        PhaseState::Succeeded
    };
    report
}

/// Drives a [`PhasePlan`] one phase at a time and tracks every phase's state.
#[derive(Debug, Default)]
pub struct PhaseRunner {
    states: BTreeMap<String, PhaseState>,
}

impl PhaseRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, phase: &str) -> Option<PhaseState> {
        self.states.get(phase).copied()
    }

    /// Run phases in plan order, calling `checkpoint` after each one.
    ///
    /// Stops at the first failed phase; later phases stay `Pending` and the
    /// processes that earlier phases started are left alone.
    pub async fn run<C>(
        &mut self,
        plan: PhasePlan,
        mut checkpoint: C,
    ) -> Result<Vec<PhaseReport>, StackError>
    where
        C: FnMut(&PhaseReport),
    {
        let phases = plan.into_phases();
        for phase in &phases {
            self.states.insert(phase.name.clone(), PhaseState::Pending);
        }

        let mut reports = Vec::with_capacity(phases.len());
        for phase in phases {
            if let Some(dep) = phase
                .depends_on
                .iter()
                .find(|dep| !self.state(dep).is_some_and(PhaseState::satisfies_dependents))
            {
                return Err(StackError::Phase {
                    phase: phase.name.clone(),
                    source: Box::new(anyhow!("dependency '{}' has not completed", dep).into()),
                });
            }

            let name = phase.name.clone();
            self.states.insert(name.clone(), PhaseState::Running);
            info!(phase = %name, steps = phase.steps.len(), "starting phase");

            let mut report = run_phase(phase).await;
            self.states.insert(name.clone(), report.state);
            checkpoint(&report);

            if let Some(err) = report.error.take() {
                return Err(StackError::Phase {
                    phase: name,
                    source: Box::new(err),
                });
            }
            info!(phase = %name, state = ?report.state, "phase finished");
            reports.push(report);
        }
        Ok(reports)
    }
}
