//! Broadcast delivery: payload model, the per-run engine, the run supervisor
//! and the trigger service the front end calls.

mod engine;
mod payload;
mod service;
mod supervisor;

use std::time::Duration;

pub use engine::{BroadcastEngine, BroadcastJob, RunReport};
pub use payload::{media_digest, MediaRef, Payload, DEFAULT_IMAGE_NAME};
pub use service::BroadcastService;
pub use supervisor::BroadcastSupervisor;

/// Pacing applied within one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Recipients per batch; a pause follows every full batch.
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            batch_delay: Duration::from_secs(1),
        }
    }
}
