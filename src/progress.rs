//! Progress-callback trait for per-run extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as a run moves through enhancement, the inference call, and parsing.
//!
//! # Example
//!
//! ```rust
//! use mediscript::{ExtractionConfig, ExtractionProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     stages: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for StageCounter {
//!     fn on_stage_complete(&self, _stage: Stage, _width: u32, _height: u32) {
//!         self.stages.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(StageCounter { stages: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Stage;
use std::sync::Arc;

/// Called by the extraction run as it progresses.
///
/// Implementations must be `Send + Sync`: [`crate::extract::run_batch`]
/// drives several runs at once and enhancement happens on a blocking thread.
/// All methods have default no-op implementations.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called when a run begins, before the input is read or downloaded.
    fn on_run_start(&self, source: &str) {
        let _ = source;
    }

    /// Called after each enhancement stage, in pipeline order.
    ///
    /// [`Stage::Original`] is reported first with the decoded dimensions.
    fn on_stage_complete(&self, stage: Stage, width: u32, height: u32) {
        let _ = (stage, width, height);
    }

    /// Called just before the inference request is sent.
    fn on_request_start(&self) {}

    /// Called when the service answered.
    ///
    /// # Arguments
    /// * `response_len` — byte length of the raw response text
    fn on_request_complete(&self, response_len: usize) {
        let _ = response_len;
    }

    /// Called once per run after parsing.
    ///
    /// # Arguments
    /// * `source`    — the input path or URL
    /// * `extracted` — whether a record was produced
    fn on_run_complete(&self, source: &str, extracted: bool) {
        let _ = (source, extracted);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
