pub mod document;
pub mod extractor;
pub mod pipeline;
pub mod publisher;
pub mod record;
pub mod router;
pub mod status;
pub mod store;

pub use document::{locate_permit_document, DocumentError, PermitDocument};
pub use extractor::{ExtractionError, PermitExtractor};
pub use pipeline::{
    PermitSyncPipeline, PipelineError, PipelineFailure, PublishStatus, RunOptions, RunReport,
    RunStage,
};
pub use publisher::{
    encode_payload, publisher_for, DirectoryPublisher, GitHubPublisher, PermitPublisher,
    PublishError, PublishReceipt,
};
pub use record::{PermitField, PermitRecord, PermitTimestamp, TimestampError};
pub use router::{permit_router, PermitView};
pub use status::PermitStatus;
pub use store::{
    commit, lookup, CommitOutcome, FileRecordStore, InMemoryRecordStore, RecordStore, StoreError,
};
