use crate::{
    config::ReportDefinition,
    dataset::{DatasetGenerator, GeneratedArtifact},
    error::RunError,
    submit::{SubmissionClient, SubmissionOutcome, SubmissionStatus, Transport},
    warehouse::Warehouse,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Extracting,
    Submitting,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Init => "init",
            RunState::Extracting => "extracting",
            RunState::Submitting => "submitting",
            RunState::Done => "done",
            RunState::Aborted => "aborted",
        })
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub artifacts: Vec<GeneratedArtifact>,
    pub outcomes: Vec<SubmissionOutcome>,
}

impl RunSummary {
    pub fn count(&self, status: SubmissionStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// A fatal error, the phase it happened in, and what had been produced before it.
#[derive(Debug, Error)]
#[error("run aborted while {phase}")]
pub struct Aborted {
    pub phase: RunState,
    #[source]
    pub error: RunError,
    pub partial: RunSummary,
}

pub struct Pipeline<W: Warehouse, T: Transport> {
    generator: DatasetGenerator<W>,
    client: SubmissionClient<T>,
    state: RunState,
}

impl<W: Warehouse, T: Transport> Pipeline<W, T> {
    pub fn new(generator: DatasetGenerator<W>, client: SubmissionClient<T>) -> Self {
        Self {
            generator,
            client,
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Extracts every report, then submits every artifact in the same order.
    ///
    /// Non-2xx responses are recorded and the loop moves on. Any [`RunError`]
    /// stops the run where it stands: no further extraction or submission.
    pub fn run(&mut self, reports: &[ReportDefinition]) -> Result<RunSummary, Aborted> {
        let pairs = self.extract_phase(reports)?;
        let mut summary = RunSummary {
            artifacts: pairs.iter().map(|(_, a)| a.clone()).collect(),
            outcomes: Vec::with_capacity(pairs.len()),
        };

        self.transition(RunState::Submitting);
        for (report, artifact) in &pairs {
            info!("----- sending {} to API -----", artifact.file_name());
            match self.client.submit(artifact, &report.token) {
                Ok(outcome) => {
                    info!("{} submission {}", report.name, outcome.status);
                    summary.outcomes.push(outcome);
                }
                Err(err) => return Err(self.abort(err, summary)),
            }
            info!("----- API call end -----");
        }

        self.transition(RunState::Done);
        info!(
            "finished: {} submitted, {} succeeded, {} failed",
            summary.outcomes.len(),
            summary.count(SubmissionStatus::Success),
            summary.count(SubmissionStatus::Failure)
        );
        Ok(summary)
    }

    /// Extraction phase on its own; nothing is submitted.
    pub fn extract(&mut self, reports: &[ReportDefinition]) -> Result<RunSummary, Aborted> {
        let pairs = self.extract_phase(reports)?;
        self.transition(RunState::Done);
        Ok(RunSummary {
            artifacts: pairs.into_iter().map(|(_, a)| a).collect(),
            outcomes: Vec::new(),
        })
    }

    fn extract_phase(
        &mut self,
        reports: &[ReportDefinition],
    ) -> Result<Vec<(ReportDefinition, GeneratedArtifact)>, Aborted> {
        self.transition(RunState::Extracting);
        let mut pairs = Vec::with_capacity(reports.len());
        if let Err(err) = self.generator.generate_all(reports, &mut pairs) {
            let partial = RunSummary {
                artifacts: pairs.into_iter().map(|(_, a)| a).collect(),
                outcomes: Vec::new(),
            };
            return Err(self.abort(err, partial));
        }
        Ok(pairs)
    }

    fn abort(&mut self, err: RunError, partial: RunSummary) -> Aborted {
        let phase = self.state;
        error!(report = err.report().unwrap_or("-"), "{}", err.detail());
        self.transition(RunState::Aborted);
        Aborted {
            phase,
            error: err,
            partial,
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!("state {} -> {}", self.state, next);
        self.state = next;
    }
}
