use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::document::PermitDocument;
use super::extractor::{ExtractionError, PermitExtractor};
use super::publisher::{PermitPublisher, PublishError, PublishReceipt};
use super::record::PermitRecord;
use super::store::{commit, CommitOutcome, RecordStore, StoreError};

/// Stages of a single sync run, in the only order they can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Extracting,
    Extracted,
    Storing,
    Stored,
    Publishing,
    Published,
    Archiving,
    Archived,
}

impl RunStage {
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Extracting),
            Self::Extracting => Some(Self::Extracted),
            Self::Extracted => Some(Self::Storing),
            Self::Storing => Some(Self::Stored),
            Self::Stored => Some(Self::Publishing),
            Self::Publishing => Some(Self::Published),
            Self::Published => Some(Self::Archiving),
            Self::Archiving => Some(Self::Archived),
            Self::Archived => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Storing => "storing",
            Self::Stored => "stored",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Archiving => "archiving",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop once the record has been extracted; nothing is written.
    pub parse_only: bool,
    /// Store the record but leave it pending publish.
    pub skip_publish: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    NotAttempted,
    /// Stored locally; the next `publish` or run will push it.
    Pending,
    Published(PublishReceipt),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub stage: RunStage,
    pub record: PermitRecord,
    pub commit: Option<CommitOutcome>,
    pub publish: PublishStatus,
    pub archived_to: Option<PathBuf>,
    /// False when publishing succeeded but the pending marker survived, so
    /// the next run will push the same permit again.
    pub pending_cleared: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineFailure {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("no publish target is configured")]
    PublishingDisabled,
    #[error("there is no current permit to publish")]
    NothingToPublish,
    #[error("unable to archive {path}: {source}")]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A run that stopped at `stage`.
#[derive(Debug, thiserror::Error)]
#[error("permit sync failed while {stage}: {source}")]
pub struct PipelineError {
    pub stage: RunStage,
    /// Permit the run was carrying when it stopped, if extraction got that far.
    pub permit_number: Option<String>,
    #[source]
    pub source: PipelineFailure,
}

struct Run {
    stage: RunStage,
    permit_number: Option<String>,
}

impl Run {
    fn start() -> Self {
        Self {
            stage: RunStage::Idle,
            permit_number: None,
        }
    }

    fn enter(&mut self, next: RunStage) {
        debug_assert_eq!(self.stage.next(), Some(next), "invalid run transition");
        debug!(from = %self.stage, to = %next, "run stage");
        self.stage = next;
    }

    fn fail(&self, source: impl Into<PipelineFailure>) -> PipelineError {
        let error = PipelineError {
            stage: self.stage,
            permit_number: self.permit_number.clone(),
            source: source.into(),
        };
        warn!(stage = %self.stage, error = %error.source, "permit sync run failed");
        error
    }
}

/// Extract, store, publish, archive: one permit at a time, strictly in that
/// order. Nothing is retried within a run; the next run is the retry.
#[derive(Debug)]
pub struct PermitSyncPipeline<S> {
    store: Arc<S>,
    extractor: PermitExtractor,
    publisher: Option<Box<dyn PermitPublisher>>,
    archive_dir: Option<PathBuf>,
}

impl<S> PermitSyncPipeline<S>
where
    S: RecordStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            extractor: PermitExtractor,
            publisher: None,
            archive_dir: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Option<Box<dyn PermitPublisher>>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_archive_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs the pipeline for the receipt at `path`.
    pub fn run<P: AsRef<Path>>(
        &self,
        path: P,
        options: RunOptions,
    ) -> Result<RunReport, PipelineError> {
        let mut run = Run::start();
        run.enter(RunStage::Extracting);
        let document = PermitDocument::from_path(path.as_ref())
            .map_err(|err| run.fail(ExtractionError::from(err)))?;
        self.carry_on(run, &document, options)
    }

    /// Runs the pipeline for a document that has already been read.
    pub fn run_document(
        &self,
        document: &PermitDocument,
        options: RunOptions,
    ) -> Result<RunReport, PipelineError> {
        let mut run = Run::start();
        run.enter(RunStage::Extracting);
        self.carry_on(run, document, options)
    }

    fn carry_on(
        &self,
        mut run: Run,
        document: &PermitDocument,
        options: RunOptions,
    ) -> Result<RunReport, PipelineError> {
        let record = self.extractor.extract(document).map_err(|err| run.fail(err))?;
        run.permit_number = Some(record.permit_number.clone());
        run.enter(RunStage::Extracted);
        info!(
            permit_number = %record.permit_number,
            plate_number = %record.plate_number,
            valid_to = %record.valid_to,
            "permit extracted"
        );

        let mut report = RunReport {
            stage: RunStage::Extracted,
            record,
            commit: None,
            publish: PublishStatus::NotAttempted,
            archived_to: None,
            pending_cleared: false,
        };
        if options.parse_only {
            return Ok(report);
        }

        run.enter(RunStage::Storing);
        let outcome = commit(self.store.as_ref(), &report.record).map_err(|err| run.fail(err))?;
        report.commit = Some(outcome);
        run.enter(RunStage::Stored);
        report.stage = RunStage::Stored;

        self.store
            .mark_pending_publish(&report.record.permit_number)
            .map_err(|err| run.fail(err))?;

        let publisher = match (&self.publisher, options.skip_publish) {
            (Some(publisher), false) => publisher,
            _ => {
                info!(permit_number = %report.record.permit_number, "publish skipped; permit left pending");
                report.publish = PublishStatus::Pending;
                return Ok(report);
            }
        };

        run.enter(RunStage::Publishing);
        let receipt = publisher
            .publish(&report.record)
            .map_err(|err| run.fail(err))?;
        report.pending_cleared = self.settle_pending();
        run.enter(RunStage::Published);
        report.stage = RunStage::Published;
        report.publish = PublishStatus::Published(receipt);

        if let (Some(archive_dir), Some(source)) = (&self.archive_dir, document.path()) {
            run.enter(RunStage::Archiving);
            let destination = archive_document(source, archive_dir, &report.record.permit_number)
                .map_err(|err| {
                    run.fail(PipelineFailure::Archive {
                        path: source.to_path_buf(),
                        source: err,
                    })
                })?;
            run.enter(RunStage::Archived);
            info!(path = %destination.display(), "permit receipt archived");
            report.stage = RunStage::Archived;
            report.archived_to = Some(destination);
        }

        Ok(report)
    }

    /// Pushes the current record again without touching any document.
    pub fn republish(&self) -> Result<(PermitRecord, PublishReceipt), PipelineError> {
        let mut run = Run::start();
        run.stage = RunStage::Stored;

        let record = self
            .store
            .get_current()
            .map_err(|err| run.fail(err))?
            .ok_or_else(|| run.fail(PipelineFailure::NothingToPublish))?;
        run.permit_number = Some(record.permit_number.clone());

        let publisher = self
            .publisher
            .as_ref()
            .ok_or_else(|| run.fail(PipelineFailure::PublishingDisabled))?;

        run.enter(RunStage::Publishing);
        let receipt = publisher.publish(&record).map_err(|err| run.fail(err))?;
        self.settle_pending();
        run.enter(RunStage::Published);
        info!(permit_number = %record.permit_number, target = %receipt.target, "permit republished");
        Ok((record, receipt))
    }

    /// Republishes only if an earlier run left the current permit pending.
    pub fn resume_pending(&self) -> Result<Option<(PermitRecord, PublishReceipt)>, PipelineError> {
        let pending = self.store.pending_publish().map_err(|source| PipelineError {
            stage: RunStage::Idle,
            permit_number: None,
            source: source.into(),
        })?;
        if pending.is_none() || self.publisher.is_none() {
            return Ok(None);
        }
        self.republish().map(Some)
    }

    fn settle_pending(&self) -> bool {
        match self.store.clear_pending_publish() {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "published, but the pending marker could not be cleared");
                false
            }
        }
    }
}

fn archive_document(source: &Path, archive_dir: &Path, permit_number: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(archive_dir)?;
    let extension = source
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("pdf");
    let destination = archive_dir.join(format!("{permit_number}.{extension}"));

    if std::fs::rename(source, &destination).is_err() {
        // rename fails across filesystems
        std::fs::copy(source, &destination)?;
        std::fs::remove_file(source)?;
    }
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_form_a_single_chain() {
        let mut stage = RunStage::Idle;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(seen.len(), 9);
        assert_eq!(seen.last(), Some(&RunStage::Archived));
    }

    #[test]
    fn archive_moves_document_under_permit_number() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("Temporary Parking Permit.pdf");
        std::fs::write(&source, b"%PDF-1.4").expect("write");

        let archived =
            archive_document(&source, &dir.path().join("archive"), "T6151625").expect("archive");
        assert_eq!(archived, dir.path().join("archive").join("T6151625.pdf"));
        assert!(archived.exists());
        assert!(!source.exists());
    }
}
