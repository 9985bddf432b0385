use std::error::Error as _;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a run. A non-2xx response from the ingestion endpoint is not
/// one of these; it is recorded as a failed outcome and the run continues.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("warehouse connection failed")]
    Connect(#[source] anyhow::Error),

    #[error("extracting return {report}")]
    Extract {
        report: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("writing CSV for return {report} to {}", path.display())]
    Persist {
        report: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("reading artifact {}", path.display())]
    ReadArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("posting return {report} to {url}")]
    Transport {
        report: String,
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("writing response log {}", path.display())]
    ResponseLog {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl RunError {
    pub fn report(&self) -> Option<&str> {
        match self {
            RunError::Extract { report, .. }
            | RunError::Persist { report, .. }
            | RunError::Transport { report, .. } => Some(report),
            RunError::Connect(_) | RunError::ReadArtifact { .. } | RunError::ResponseLog { .. } => {
                None
            }
        }
    }

    /// The message followed by every cause, `: `-separated.
    pub fn detail(&self) -> String {
        let mut out = self.to_string();
        let mut cause = self.source();
        while let Some(c) = cause {
            out.push_str(": ");
            out.push_str(&c.to_string());
            cause = c.source();
        }
        out
    }
}
