//! Fixed-order step execution with HARD / SOFT failure semantics.

use crate::error::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Abort the pipeline.
    Hard,
    /// Log a warning and continue.
    Soft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Ran,
    /// The idempotency check reported the work as already done.
    Skipped,
    /// A SOFT step failed; the message is what was logged.
    Warned(String),
}

type Check<'a, C> = Box<dyn FnMut(&mut C) -> bool + 'a>;
type Action<'a, C> = Box<dyn FnMut(&mut C) -> Result<()> + 'a>;

pub struct Step<'a, C> {
    name: &'static str,
    class: FailureClass,
    satisfied: Option<Check<'a, C>>,
    action: Action<'a, C>,
}

impl<'a, C> Step<'a, C> {
    pub fn hard(name: &'static str, action: impl FnMut(&mut C) -> Result<()> + 'a) -> Self {
        Self::new(name, FailureClass::Hard, action)
    }

    pub fn soft(name: &'static str, action: impl FnMut(&mut C) -> Result<()> + 'a) -> Self {
        Self::new(name, FailureClass::Soft, action)
    }

    fn new(
        name: &'static str,
        class: FailureClass,
        action: impl FnMut(&mut C) -> Result<()> + 'a,
    ) -> Self {
        Self {
            name,
            class,
            satisfied: None,
            action: Box::new(action),
        }
    }

    /// Skip the action when `check` returns true.
    pub fn skip_if(mut self, check: impl FnMut(&mut C) -> bool + 'a) -> Self {
        self.satisfied = Some(Box::new(check));
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: &'static str,
    pub class: FailureClass,
    pub outcome: StepOutcome,
}

impl PipelineReport {
    pub fn outcome(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name).map(|s| &s.outcome)
    }

    pub fn warnings(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.steps.iter().filter_map(|s| match &s.outcome {
            StepOutcome::Warned(msg) => Some((s.name, msg.as_str())),
            _ => None,
        })
    }
}

pub struct Pipeline<'a, C> {
    steps: Vec<Step<'a, C>>,
}

impl<'a, C> Default for Pipeline<'a, C> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<'a, C> Pipeline<'a, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: Step<'a, C>) -> Self {
        self.steps.push(step);
        self
    }

    /// Run every step in declared order.
    ///
    /// A HARD failure or any interruption returns the error immediately. A
    /// SOFT failure is logged and recorded in the report.
    pub fn run(self, ctx: &mut C) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        for mut step in self.steps {
            if let Some(check) = step.satisfied.as_mut() {
                if check(&mut *ctx) {
                    tracing::info!(step = step.name, "already satisfied, skipping");
                    report.steps.push(StepRecord {
                        name: step.name,
                        class: step.class,
                        outcome: StepOutcome::Skipped,
                    });
                    continue;
                }
            }

            tracing::info!(step = step.name, "running");
            match (step.action)(&mut *ctx) {
                Ok(()) => report.steps.push(StepRecord {
                    name: step.name,
                    class: step.class,
                    outcome: StepOutcome::Ran,
                }),
                Err(e) if e.is_interrupted() || step.class == FailureClass::Hard => {
                    tracing::error!(step = step.name, "step failed");
                    return Err(e);
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(step = step.name, error = %message, "soft step failed, continuing");
                    report.steps.push(StepRecord {
                        name: step.name,
                        class: step.class,
                        outcome: StepOutcome::Warned(message),
                    });
                }
            }
        }
        Ok(report)
    }
}
