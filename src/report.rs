use crate::{
    config::ReportDefinition,
    pipeline::{Aborted, RunState, RunSummary},
    submit::SubmissionStatus,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started: String,
    pub finished: String,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_while: Option<RunState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub returns: Vec<ReturnReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnReport {
    pub name: String,
    pub csv: Option<PathBuf>,
    pub rows: Option<usize>,
    pub status: Option<SubmissionStatus>,
    pub http_status: Option<u16>,
    pub response_log: Option<PathBuf>,
}

impl RunReport {
    /// One entry per requested report, filled in as far as the run got.
    pub fn new(
        started: String,
        finished: String,
        reports: &[ReportDefinition],
        result: &Result<RunSummary, Aborted>,
    ) -> Self {
        let (state, aborted_while, error, summary) = match result {
            Ok(summary) => (RunState::Done, None, None, summary),
            Err(a) => (
                RunState::Aborted,
                Some(a.phase),
                Some(a.error.detail()),
                &a.partial,
            ),
        };

        let returns = reports
            .iter()
            .map(|r| {
                let artifact = summary.artifacts.iter().find(|a| a.report_name == r.name);
                let outcome = summary.outcomes.iter().find(|o| o.report_name == r.name);
                ReturnReport {
                    name: r.name.clone(),
                    csv: artifact.map(|a| a.file_path.clone()),
                    rows: artifact.map(|a| a.rows),
                    status: outcome.map(|o| o.status),
                    http_status: outcome.map(|o| o.http_status),
                    response_log: outcome.map(|o| o.response_log.clone()),
                }
            })
            .collect();

        Self {
            started,
            finished,
            state,
            aborted_while,
            error,
            returns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::GeneratedArtifact, error::RunError, submit::SubmissionOutcome, util::now,
    };
    use anyhow::anyhow;

    fn report(name: &str) -> ReportDefinition {
        ReportDefinition {
            name: name.into(),
            query: "select 1".into(),
            token: "t".into(),
        }
    }

    fn artifact(name: &str) -> GeneratedArtifact {
        GeneratedArtifact {
            report_name: name.into(),
            file_path: PathBuf::from(format!("csv/{name}_20240307090501.csv")),
            created_at: now(),
            rows: 4,
        }
    }

    fn outcome(name: &str, status: SubmissionStatus, http_status: u16) -> SubmissionOutcome {
        SubmissionOutcome {
            report_name: name.into(),
            artifact: artifact(name),
            status,
            http_status,
            response_body: String::new(),
            responded_at: now(),
            response_log: PathBuf::from(format!("resp/{name}_ApiResponse{status}.txt")),
        }
    }

    fn build(result: &Result<RunSummary, Aborted>) -> RunReport {
        let reports = [report("A"), report("B"), report("C")];
        RunReport::new("start".into(), "end".into(), &reports, result)
    }

    #[test]
    fn done_run_lists_every_return() {
        let summary = RunSummary {
            artifacts: vec![artifact("A"), artifact("B"), artifact("C")],
            outcomes: vec![
                outcome("A", SubmissionStatus::Success, 200),
                outcome("B", SubmissionStatus::Failure, 401),
                outcome("C", SubmissionStatus::Success, 201),
            ],
        };
        let r = build(&Ok(summary));

        assert_eq!(r.state, RunState::Done);
        assert!(r.aborted_while.is_none() && r.error.is_none());
        let statuses: Vec<_> = r.returns.iter().map(|x| x.status).collect();
        assert_eq!(
            statuses,
            [
                Some(SubmissionStatus::Success),
                Some(SubmissionStatus::Failure),
                Some(SubmissionStatus::Success)
            ]
        );
        assert_eq!(r.returns[1].http_status, Some(401));
    }

    #[test]
    fn abort_during_extraction_fills_only_what_was_written() {
        let aborted = Aborted {
            phase: RunState::Extracting,
            error: RunError::Extract {
                report: "B".into(),
                source: anyhow!("invalid object name"),
            },
            partial: RunSummary {
                artifacts: vec![artifact("A")],
                outcomes: Vec::new(),
            },
        };
        let r = build(&Err(aborted));

        assert_eq!(r.state, RunState::Aborted);
        assert_eq!(r.aborted_while, Some(RunState::Extracting));
        assert_eq!(
            r.error.as_deref(),
            Some("extracting return B: invalid object name")
        );
        assert_eq!(r.returns[0].rows, Some(4));
        assert!(r.returns[0].status.is_none());
        assert!(r.returns[1].csv.is_none() && r.returns[2].csv.is_none());

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["aborted_while"], "EXTRACTING");
    }

    #[test]
    fn abort_during_submission_keeps_earlier_outcomes() {
        let aborted = Aborted {
            phase: RunState::Submitting,
            error: RunError::Transport {
                report: "B".into(),
                url: "http://x/B_20240307090501.csv".into(),
                source: anyhow!("connection refused"),
            },
            partial: RunSummary {
                artifacts: vec![artifact("A"), artifact("B"), artifact("C")],
                outcomes: vec![outcome("A", SubmissionStatus::Success, 200)],
            },
        };
        let r = build(&Err(aborted));

        assert_eq!(r.aborted_while, Some(RunState::Submitting));
        assert!(r.returns.iter().all(|x| x.csv.is_some()));
        assert_eq!(r.returns[0].status, Some(SubmissionStatus::Success));
        assert!(r.returns[1].status.is_none() && r.returns[2].status.is_none());
        assert!(r.error.unwrap().contains("connection refused"));
    }
}
