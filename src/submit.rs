use crate::{
    config::Api,
    dataset::GeneratedArtifact,
    error::RunError,
    util::{ensure_dir, now, rfc3339, sha256_hex},
};
use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Success,
    Failure,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmissionStatus::Success => "SUCCESS",
            SubmissionStatus::Failure => "FAILURE",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub report_name: String,
    pub artifact: GeneratedArtifact,
    pub status: SubmissionStatus,
    pub http_status: u16,
    pub response_body: String,
    #[serde(with = "time::serde::rfc3339")]
    pub responded_at: OffsetDateTime,
    pub response_log: PathBuf,
}

/// What came back from the endpoint, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one upload. `Err` means no HTTP response was obtained at all.
pub trait Transport {
    fn post(&self, url: &str, token: &str, body: Vec<u8>) -> Result<HttpReply>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post(&self, url: &str, token: &str, body: Vec<u8>) -> Result<HttpReply> {
        (**self).post(url, token, body)
    }
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(api: &Api) -> Result<Self> {
        let timeout = match api.timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(api.user_agent.clone())
            .build()
            .with_context(|| "building HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn post(&self, url: &str, token: &str, body: Vec<u8>) -> Result<HttpReply> {
        let resp = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()?;
        let status = resp.status();
        let body = resp.text().with_context(|| "reading response body")?;
        Ok(HttpReply {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            body,
        })
    }
}

pub struct SubmissionClient<T: Transport> {
    transport: T,
    base_url: String,
    response_dir: PathBuf,
}

impl<T: Transport> SubmissionClient<T> {
    pub fn new(
        transport: T,
        base_url: impl Into<String>,
        response_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            response_dir: response_dir.into(),
        }
    }

    pub fn url_for(&self, artifact: &GeneratedArtifact) -> String {
        format!("{}{}", self.base_url, artifact.file_name())
    }

    /// Uploads one artifact and writes its response log.
    ///
    /// Any HTTP response, 2xx or not, yields an outcome. Failing to get a
    /// response at all is a [`RunError::Transport`]; the exception text is still
    /// written to a FAILURE response log before returning.
    pub fn submit(
        &self,
        artifact: &GeneratedArtifact,
        token: &str,
    ) -> Result<SubmissionOutcome, RunError> {
        let url = self.url_for(artifact);
        let content =
            std::fs::read(&artifact.file_path).map_err(|source| RunError::ReadArtifact {
                path: artifact.file_path.clone(),
                source,
            })?;
        let digest = sha256_hex(&content);
        let bytes = content.len();

        info!("posting to {url}");
        info!("file name: {}", artifact.file_name());

        let reply = match self.transport.post(&url, token, content) {
            Ok(reply) => reply,
            Err(source) => {
                let log_path =
                    response_log_path(&self.response_dir, artifact, SubmissionStatus::Failure);
                let text = format!(
                    "Return: {}\nUrl: {url}\nOutcome: FAILURE\nError: {source:#}\nAt: {}\n",
                    artifact.report_name,
                    rfc3339(now())
                );
                if let Err(e) = write_response_log(&log_path, &text) {
                    error!(
                        "could not record transport failure in {}: {e:#}",
                        log_path.display()
                    );
                }
                return Err(RunError::Transport {
                    report: artifact.report_name.clone(),
                    url,
                    source,
                });
            }
        };
        let responded_at = now();

        let status = if reply.is_success() {
            info!("upload completed successfully");
            info!("response: {} {}", reply.status, reply.reason);
            info!("response content: {}", reply.body);
            SubmissionStatus::Success
        } else {
            error!("something went wrong submitting {}", artifact.report_name);
            error!("response: {} {}", reply.status, reply.reason);
            error!("response content: {}", reply.body);
            SubmissionStatus::Failure
        };

        let log_path = response_log_path(&self.response_dir, artifact, status);
        let summary = format!(
            "Return: {}\nUrl: {url}\nResponse: {} {}\nOutcome: {status}\nResponded: {}\n\
             File: {}\nBytes: {bytes}\nSHA-256: {digest}\n\nResponse Content:\n{}\n",
            artifact.report_name,
            reply.status,
            reply.reason,
            rfc3339(responded_at),
            artifact.file_path.display(),
            reply.body,
        );
        write_response_log(&log_path, &summary).map_err(|source| RunError::ResponseLog {
            path: log_path.clone(),
            source,
        })?;

        Ok(SubmissionOutcome {
            report_name: artifact.report_name.clone(),
            artifact: artifact.clone(),
            status,
            http_status: reply.status,
            response_body: reply.body,
            responded_at,
            response_log: log_path,
        })
    }
}

/// `<dir>/<artifact stem>_ApiResponse<STATUS>.txt`, with `_2`, `_3`, ... appended
/// when an earlier attempt for the same artifact already left that file.
pub fn response_log_path(
    dir: &Path,
    artifact: &GeneratedArtifact,
    status: SubmissionStatus,
) -> PathBuf {
    let base = format!("{}_ApiResponse{status}", artifact.file_stem());
    let mut path = dir.join(format!("{base}.txt"));
    let mut n = 2u32;
    while path.exists() {
        path = dir.join(format!("{base}_{n}.txt"));
        n += 1;
    }
    path
}

fn write_response_log(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("write {}", path.display()))
}
