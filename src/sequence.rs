use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Criticality {
    /// A failure stops the sequence.
    Critical,
    /// A failure is logged as a warning and the sequence continues.
    NonCritical,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Warned(String),
    Failed(String),
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
}

impl fmt::Display for StepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            StepOutcome::Succeeded => write!(f, "[ok]      {}", self.name),
            StepOutcome::Warned(reason) => write!(f, "[warning] {}: {reason}", self.name),
            StepOutcome::Failed(reason) => write!(f, "[failed]  {}: {reason}", self.name),
            StepOutcome::Skipped => write!(f, "[skipped] {}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{step} failed: {reason}")]
pub struct StepError {
    pub step: String,
    pub reason: String,
}

type Action<'a, C> = Box<dyn FnMut(&mut C) -> Result<(), String> + 'a>;
type Condition<'a, C> = Box<dyn Fn(&C) -> bool + 'a>;

pub struct Step<'a, C> {
    name: String,
    criticality: Criticality,
    condition: Option<Condition<'a, C>>,
    action: Action<'a, C>,
}

impl<'a, C> Step<'a, C> {
    pub fn critical(
        name: impl Into<String>,
        action: impl FnMut(&mut C) -> Result<(), String> + 'a,
    ) -> Self {
        Self {
            name: name.into(),
            criticality: Criticality::Critical,
            condition: None,
            action: Box::new(action),
        }
    }

    pub fn non_critical(
        name: impl Into<String>,
        action: impl FnMut(&mut C) -> Result<(), String> + 'a,
    ) -> Self {
        Self {
            name: name.into(),
            criticality: Criticality::NonCritical,
            condition: None,
            action: Box::new(action),
        }
    }

    /// Runs the step only when `condition` holds; otherwise it is reported
    /// as skipped.
    pub fn only_if(mut self, condition: impl Fn(&C) -> bool + 'a) -> Self {
        self.condition = Some(Box::new(condition));
        self
    }

    fn run(&mut self, context: &mut C, tag: &str) -> StepReport {
        if let Some(condition) = &self.condition
            && !condition(context)
        {
            log::debug!("[{tag}] skipping {}", self.name);
            return self.report(StepOutcome::Skipped);
        }

        log::info!("[{tag}] {}", self.name);
        let outcome = match ((self.action)(context), self.criticality) {
            (Ok(()), _) => StepOutcome::Succeeded,
            (Err(reason), Criticality::Critical) => {
                log::error!("[{tag}] {} failed: {reason}", self.name);
                StepOutcome::Failed(reason)
            }
            (Err(reason), Criticality::NonCritical) => {
                log::warn!("[{tag}] {}: {reason}", self.name);
                StepOutcome::Warned(reason)
            }
        };
        self.report(outcome)
    }

    fn report(&self, outcome: StepOutcome) -> StepReport {
        StepReport {
            name: self.name.clone(),
            outcome,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceReport {
    pub steps: Vec<StepReport>,
    pub error: Option<StepError>,
}

impl SequenceReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    #[cfg(test)]
    pub fn outcome_of(&self, name: &str) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|report| report.name == name)
            .map(|report| &report.outcome)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|report| matches!(report.outcome, StepOutcome::Warned(_)))
    }
}

/// Ordered steps run against a shared context. The first critical failure
/// skips every remaining step; the finally step runs regardless.
pub struct Sequence<'a, C> {
    tag: &'static str,
    steps: Vec<Step<'a, C>>,
    finally: Option<Step<'a, C>>,
}

impl<'a, C> Sequence<'a, C> {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            steps: Vec::new(),
            finally: None,
        }
    }

    pub fn step(mut self, step: Step<'a, C>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn finally(mut self, step: Step<'a, C>) -> Self {
        self.finally = Some(step);
        self
    }

    pub fn run(mut self, context: &mut C) -> SequenceReport {
        let mut report = SequenceReport::default();

        for step in &mut self.steps {
            if report.error.is_some() {
                report.steps.push(step.report(StepOutcome::Skipped));
                continue;
            }

            let step_report = step.run(context, self.tag);
            if let StepOutcome::Failed(reason) = &step_report.outcome {
                report.error = Some(StepError {
                    step: step_report.name.clone(),
                    reason: reason.clone(),
                });
            }
            report.steps.push(step_report);
        }

        if let Some(mut step) = self.finally.take() {
            let step_report = step.run(context, self.tag);
            if report.error.is_none()
                && let StepOutcome::Failed(reason) = &step_report.outcome
            {
                report.error = Some(StepError {
                    step: step_report.name.clone(),
                    reason: reason.clone(),
                });
            }
            report.steps.push(step_report);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        ran: Vec<&'static str>,
        unlocked: bool,
    }

    #[test]
    fn stops_at_first_critical_failure_and_runs_finally() {
        let mut trace = Trace::default();
        let report = Sequence::new("test")
            .step(Step::non_critical("unlock", |trace: &mut Trace| {
                trace.ran.push("unlock");
                trace.unlocked = true;
                Ok(())
            }))
            .step(Step::non_critical("optional", |trace: &mut Trace| {
                trace.ran.push("optional");
                Err("not available".into())
            }))
            .step(Step::critical("download", |trace: &mut Trace| {
                trace.ran.push("download");
                Err("404".into())
            }))
            .step(Step::critical("extract", |trace: &mut Trace| {
                trace.ran.push("extract");
                Ok(())
            }))
            .finally(
                Step::non_critical("lock", |trace: &mut Trace| {
                    trace.ran.push("lock");
                    Ok(())
                })
                .only_if(|trace| trace.unlocked),
            )
            .run(&mut trace);

        assert_eq!(trace.ran, ["unlock", "optional", "download", "lock"]);
        assert_eq!(
            report.error,
            Some(StepError {
                step: "download".into(),
                reason: "404".into()
            })
        );
        assert_eq!(report.outcome_of("extract"), Some(&StepOutcome::Skipped));
        assert_eq!(report.outcome_of("lock"), Some(&StepOutcome::Succeeded));
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn finally_honours_its_condition() {
        let mut trace = Trace::default();
        let report = Sequence::new("test")
            .step(Step::critical("work", |trace: &mut Trace| {
                trace.ran.push("work");
                Ok(())
            }))
            .finally(
                Step::non_critical("lock", |trace: &mut Trace| {
                    trace.ran.push("lock");
                    Ok(())
                })
                .only_if(|trace| trace.unlocked),
            )
            .run(&mut trace);

        assert!(report.succeeded());
        assert_eq!(trace.ran, ["work"]);
        assert_eq!(report.outcome_of("lock"), Some(&StepOutcome::Skipped));
    }
}
