use base64::Engine as _;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::record::PermitRecord;
use super::store::{write_atomic, CURRENT_FILE};
use crate::config::{GitHubSettings, PublishTarget};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("transmission to {target} failed: {reason}")]
    TransmissionFailure { target: String, reason: String },
    #[error("{target} rejected the credentials (HTTP {status})")]
    AuthFailure { target: String, status: u16 },
    #[error("{target} refused the update (HTTP {status}): {message}")]
    Rejected {
        target: String,
        status: u16,
        message: String,
    },
    #[error("permit payload could not be encoded: {0}")]
    Encoding(String),
    #[error("publisher runtime unavailable: {0}")]
    Runtime(String),
}

/// Confirmation that the remote copy now matches the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub target: String,
    pub revision: Option<String>,
}

/// Pushes the current permit somewhere display devices can read it without
/// credentials. Each call replaces the remote copy wholesale and returns
/// straight away on failure; retrying is the caller's business.
pub trait PermitPublisher: Debug + Send + Sync {
    fn target(&self) -> String;
    fn publish(&self, record: &PermitRecord) -> Result<PublishReceipt, PublishError>;
}

/// The published document: the whole record, two-space indented.
pub fn encode_payload(record: &PermitRecord) -> Result<String, PublishError> {
    serde_json::to_string_pretty(record).map_err(|err| PublishError::Encoding(err.to_string()))
}

/// Builds the publisher selected by configuration, if any.
pub fn publisher_for(
    target: &PublishTarget,
) -> Result<Option<Box<dyn PermitPublisher>>, PublishError> {
    let publisher: Box<dyn PermitPublisher> = match target {
        PublishTarget::GitHub(settings) => {
            Box::new(GitHubPublisher::with_runtime(settings.clone())?)
        }
        PublishTarget::Directory(dir) => Box::new(DirectoryPublisher::new(dir.clone())),
        PublishTarget::Disabled => return Ok(None),
    };
    Ok(Some(publisher))
}

/// Mirrors the record into a directory served as static files.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    dir: PathBuf,
}

impl DirectoryPublisher {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl PermitPublisher for DirectoryPublisher {
    fn target(&self) -> String {
        self.dir.join(CURRENT_FILE).display().to_string()
    }

    fn publish(&self, record: &PermitRecord) -> Result<PublishReceipt, PublishError> {
        let payload = encode_payload(record)?;
        let path = self.dir.join(CURRENT_FILE);
        write_atomic(&path, payload.as_bytes()).map_err(|err| {
            PublishError::TransmissionFailure {
                target: self.target(),
                reason: err.to_string(),
            }
        })?;
        info!(permit_number = %record.permit_number, path = %path.display(), "permit mirrored");
        Ok(PublishReceipt {
            target: self.target(),
            revision: None,
        })
    }
}

/// Commits the record to a file in a GitHub repository through the contents
/// API. The raw file URL is what the display firmware polls.
///
/// Owns a runtime so synchronous callers never see the async client.
pub struct GitHubPublisher {
    settings: GitHubSettings,
    http: reqwest::Client,
    runtime: Runtime,
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    sha: String,
}

#[derive(Debug, Serialize)]
struct ContentsUpdate<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentsUpdateResponse {
    commit: Option<CommitRef>,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubMessage {
    message: Option<String>,
}

impl GitHubPublisher {
    pub fn new(settings: GitHubSettings, http: reqwest::Client, runtime: Runtime) -> Self {
        Self {
            settings,
            http,
            runtime,
        }
    }

    pub fn with_runtime(settings: GitHubSettings) -> Result<Self, PublishError> {
        let runtime = Runtime::new().map_err(|err| PublishError::Runtime(err.to_string()))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("permit-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| PublishError::Runtime(err.to_string()))?;
        Ok(Self::new(settings, http, runtime))
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.settings.contents_url())
            .header(
                reqwest::header::AUTHORIZATION,
                format!("token {}", self.settings.token.expose_secret()),
            )
            .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
    }

    fn transmission(&self, err: reqwest::Error) -> PublishError {
        PublishError::TransmissionFailure {
            target: self.target(),
            reason: err.to_string(),
        }
    }

    async fn refusal(&self, status: StatusCode, resp: reqwest::Response) -> PublishError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return PublishError::AuthFailure {
                target: self.target(),
                status: status.as_u16(),
            };
        }

        let raw = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GitHubMessage>(&raw)
            .ok()
            .and_then(|body| body.message)
            .unwrap_or_else(|| {
                if raw.is_empty() {
                    status.to_string()
                } else {
                    raw
                }
            });
        PublishError::Rejected {
            target: self.target(),
            status: status.as_u16(),
            message,
        }
    }

    /// Blob sha of the existing file; `None` when the file does not exist yet.
    async fn current_sha(&self) -> Result<Option<String>, PublishError> {
        let resp = self
            .request(reqwest::Method::GET)
            .query(&[("ref", self.settings.branch.as_str())])
            .send()
            .await
            .map_err(|err| self.transmission(err))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(self.refusal(status, resp).await);
        }

        let entry: ContentsEntry = resp.json().await.map_err(|err| self.transmission(err))?;
        Ok(Some(entry.sha))
    }

    async fn put_contents(
        &self,
        record: &PermitRecord,
        payload: &str,
    ) -> Result<PublishReceipt, PublishError> {
        let sha = self.current_sha().await?;
        debug!(existing = sha.is_some(), url = %self.settings.contents_url(), "updating permit file");

        let update = ContentsUpdate {
            message: format!("Update permit to {}", record.permit_number),
            content: base64::engine::general_purpose::STANDARD.encode(payload),
            branch: &self.settings.branch,
            sha,
        };

        let resp = self
            .request(reqwest::Method::PUT)
            .json(&update)
            .send()
            .await
            .map_err(|err| self.transmission(err))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(self.refusal(status, resp).await);
        }

        let body: ContentsUpdateResponse =
            resp.json().await.map_err(|err| self.transmission(err))?;
        Ok(PublishReceipt {
            target: self.target(),
            revision: body.commit.map(|commit| commit.sha),
        })
    }
}

impl Debug for GitHubPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubPublisher")
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

impl PermitPublisher for GitHubPublisher {
    fn target(&self) -> String {
        self.settings.public_url()
    }

    fn publish(&self, record: &PermitRecord) -> Result<PublishReceipt, PublishError> {
        let payload = encode_payload(record)?;
        let receipt = self.runtime.block_on(self.put_contents(record, &payload))?;
        info!(
            permit_number = %record.permit_number,
            branch = %self.settings.branch,
            revision = receipt.revision.as_deref().unwrap_or("-"),
            "permit pushed to GitHub"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permit::record::PermitTimestamp;

    fn record() -> PermitRecord {
        PermitRecord {
            permit_number: "T6151625".to_string(),
            plate_number: "ABC123".to_string(),
            valid_from: PermitTimestamp::parse("Nov 7, 2025: 18:00").expect("from"),
            valid_to: PermitTimestamp::parse("Nov 14, 2025: 17:59").expect("to"),
            barcode_value: Some("6151625".to_string()),
            barcode_label: Some("00435".to_string()),
            amount_paid: None,
        }
    }

    #[test]
    fn payload_is_two_space_indented_json() {
        let payload = encode_payload(&record()).expect("encode");
        assert!(payload.starts_with("{\n  \"permitNumber\": \"T6151625\",\n"));
        let decoded: PermitRecord = serde_json::from_str(&payload).expect("decode");
        assert_eq!(decoded, record());
    }

    #[test]
    fn directory_publisher_replaces_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let publisher = DirectoryPublisher::new(dir.path().join("www"));

        publisher.publish(&record()).expect("first publish");
        let mut next = record();
        next.permit_number = "T6151999".to_string();
        let receipt = publisher.publish(&next).expect("second publish");

        assert!(receipt.target.ends_with(CURRENT_FILE));
        let raw = std::fs::read_to_string(dir.path().join("www").join(CURRENT_FILE))
            .expect("read mirror");
        let mirrored: PermitRecord = serde_json::from_str(&raw).expect("decode");
        assert_eq!(mirrored, next);
    }

    #[test]
    fn disabled_target_has_no_publisher() {
        let publisher = publisher_for(&PublishTarget::Disabled).expect("build");
        assert!(publisher.is_none());
    }
}
