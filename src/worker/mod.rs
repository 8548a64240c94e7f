//! Mining worker implementations
//!
//! Honest proof-of-work miners and the faulty miner that exercises the
//! validator's rejection path. Every worker talks to the validator only
//! through [`SharedState`].

use crate::checksum::Checksum;
use crate::state::SharedState;
use crate::utils::compute_rate;
use crate::{MinerId, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Span;

pub mod faulty;
pub mod pow;

pub use faulty::FaultyWorker;
pub use pow::ProofOfWorkWorker;

/// Mining statistics for a worker
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    /// Worker that produced these numbers
    pub miner_id: MinerId,
    /// Worker type name
    pub worker_type: &'static str,
    /// Checksums computed
    pub hashes: u64,
    /// Candidates written to the mailbox
    pub submitted: u64,
    /// Searches abandoned because another candidate won the height
    pub superseded: u64,
    /// Time spent running
    pub elapsed: Duration,
}

impl WorkerStats {
    /// Empty statistics for a worker
    pub fn new(miner_id: MinerId, worker_type: &'static str) -> Self {
        Self {
            miner_id,
            worker_type,
            ..Self::default()
        }
    }

    /// Average hash rate over the whole run (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        compute_rate(self.hashes, self.elapsed)
    }
}

/// Mining worker trait
///
/// A worker runs until the cancellation token fires, submitting candidates
/// through the shared state as it finds (or forges) them.
#[async_trait]
pub trait MiningWorker: Send + Sync {
    /// Get the worker type name for logging
    fn worker_type(&self) -> &'static str;

    /// Identifier stamped on every header this worker submits
    fn miner_id(&self) -> MinerId;

    /// Run until cancelled
    async fn run(&mut self, cancellation: CancellationToken) -> Result<WorkerStats>;
}

/// Worker factory for creating workers bound to one shared state
#[derive(Clone)]
pub struct WorkerFactory {
    shared: Arc<SharedState>,
    checksum: Arc<dyn Checksum>,
}

impl WorkerFactory {
    /// Create a factory for workers mining on `shared`
    pub fn new(shared: Arc<SharedState>, checksum: Arc<dyn Checksum>) -> Self {
        Self { shared, checksum }
    }

    /// Create an honest proof-of-work worker
    pub fn create_pow_worker(&self, miner_id: MinerId) -> Box<dyn MiningWorker> {
        Box::new(ProofOfWorkWorker::new(
            miner_id,
            Arc::clone(&self.shared),
            Arc::clone(&self.checksum),
        ))
    }

    /// Create a worker that submits a forged candidate every `interval`
    pub fn create_faulty_worker(&self, miner_id: MinerId, interval: Duration) -> Box<dyn MiningWorker> {
        Box::new(FaultyWorker::new(
            miner_id,
            Arc::clone(&self.shared),
            Arc::clone(&self.checksum),
            interval,
        ))
    }
}

/// Create a tracing span for mining operations
pub fn mining_span(worker_type: &str, miner_id: MinerId) -> Span {
    tracing::info_span!(
        "mining",
        worker_type = worker_type,
        miner_id = miner_id.value(),
    )
}
