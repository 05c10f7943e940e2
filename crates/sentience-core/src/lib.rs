//! Shared data model and external-collaborator contracts for the
//! verification core: the `Snapshot`/`AssertionRecord`/`StepState` types
//! every other `sentience-*` crate builds on, plus the trait seams for the
//! browser driver, tracer, and vision provider — all of which live outside
//! this workspace.

pub mod digest;
pub mod driver;
pub mod ids;
pub mod model;
pub mod sink;
pub mod tracer;
pub mod vision;

pub use digest::snapshot_digest;
pub use driver::{Driver, DriverError, ScreenshotOptions, SnapshotOptions};
pub use ids::{new_run_id, step_id};
pub use model::{
    AssertContext, AssertionRecord, BBox, CaptchaDiagnostics, Diagnostics, DownloadEvent,
    DownloadStatus, Element, Predicate, PredicateOutcome, Snapshot, StepState,
};
pub use sink::FailureArtifactSink;
pub use tracer::{EventKind, Tracer};
pub use vision::{VisionError, VisionOptions, VisionProvider, VisionResponse};
