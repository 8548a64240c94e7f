//! Simulation coordinator
//!
//! Owns the shared state and the stop signal. Starts the validator on a
//! dedicated OS thread first, then the honest miners and the faulty miner,
//! and collects everyone's statistics once the stop signal fires.

use crate::chain::Chain;
use crate::checksum::Checksum;
use crate::state::SharedState;
use crate::utils::format_hash;
use crate::validator::{Validator, ValidatorStats};
use crate::worker::{MiningWorker, WorkerFactory, WorkerStats};
use crate::{Error, MinerId, Result, Target};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs on the validator's thread before it starts validating
pub type ThreadHook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Highest cross-platform thread priority
pub const MAX_THREAD_PRIORITY: u8 = 99;

/// Hook raising the calling thread to `priority` (0 lowest, 99 highest).
///
/// An out-of-range priority is rejected here. Applying the hook can still
/// fail when the process lacks the privilege to raise its priority.
pub fn priority_hook(priority: u8) -> Result<ThreadHook> {
    let value = ThreadPriorityValue::try_from(priority).map_err(|e| {
        Error::config(format!(
            "Invalid thread priority {} (0-{}): {:?}",
            priority, MAX_THREAD_PRIORITY, e
        ))
    })?;

    Ok(Arc::new(move || -> Result<()> {
        set_current_thread_priority(ThreadPriority::Crossplatform(value)).map_err(|e| {
            Error::config(format!("Cannot set thread priority {}: {:?}", priority, e))
        })?;
        debug!(priority, thread = ?thread::current().name(), "Thread priority raised");
        Ok(())
    }))
}

/// Parameters of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Number of honest miners
    pub miners: usize,
    /// Leading zero bits every block must show
    pub difficulty: u32,
    /// Halt once the head height exceeds this
    pub max_height: u64,
    /// Delay between forged submissions
    pub faulty_interval: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            miners: 4,
            difficulty: 16,
            max_height: 100,
            faulty_interval: Duration::from_secs(1),
        }
    }
}

impl SimulationConfig {
    /// Reject parameters no run can start with
    pub fn validate(&self) -> Result<()> {
        if self.miners == 0 {
            return Err(Error::config("At least one honest miner is required"));
        }
        Target::from_difficulty(self.difficulty)?;
        if self.faulty_interval.is_zero() {
            return Err(Error::config("Faulty miner interval must be greater than 0"));
        }
        Ok(())
    }

    /// Identifier of the faulty miner, one past the last honest miner
    pub fn faulty_miner_id(&self) -> MinerId {
        MinerId::new(self.miners as u32 + 1)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The chain grew past its bound
    Halted { height: u64 },
    /// Stopped from outside before reaching the bound
    Interrupted,
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub outcome: Outcome,
    pub chain: Chain,
    pub validator: ValidatorStats,
    pub workers: Vec<WorkerStats>,
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Hashes computed by all workers together
    pub fn total_hashes(&self) -> u64 {
        self.workers.iter().map(|w| w.hashes).sum()
    }
}

/// A single run of miners against one validator
pub struct Simulation {
    config: SimulationConfig,
    checksum: Arc<dyn Checksum>,
    shared: Arc<SharedState>,
    shutdown: CancellationToken,
    validator_hook: Option<ThreadHook>,
}

impl Simulation {
    /// Prepare a run on a fresh chain
    pub fn new(config: SimulationConfig, checksum: Arc<dyn Checksum>) -> Self {
        let shared = SharedState::new(config.difficulty);
        Self {
            config,
            checksum,
            shared,
            shutdown: CancellationToken::new(),
            validator_hook: None,
        }
    }

    /// Run `hook` on the validator thread before validation starts.
    ///
    /// An error from the hook aborts the run before any worker is spawned.
    pub fn with_validator_hook(mut self, hook: ThreadHook) -> Self {
        self.validator_hook = Some(hook);
        self
    }

    /// Token that stops the run when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// State shared by the validator and the workers
    pub fn shared_state(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    /// Run until the chain exceeds its bound or the shutdown token fires
    pub async fn run(self) -> Result<SimulationReport> {
        self.config.validate()?;
        let started = Instant::now();

        info!(
            miners = self.config.miners,
            difficulty = self.config.difficulty,
            max_height = self.config.max_height,
            faulty_miner = %self.config.faulty_miner_id(),
            checksum = self.checksum.name(),
            "Starting simulation"
        );

        let validator = self.spawn_validator().await?;
        let workers = self.spawn_workers();

        let validator_stats = task::spawn_blocking(move || validator.join())
            .await?
            .map_err(|_| Error::thread_panicked("validator"));

        // Workers must stop even if the validator did not halt on its own.
        self.shutdown.cancel();

        let mut worker_stats = Vec::with_capacity(workers.len());
        let mut first_error = None;
        for handle in workers {
            match handle.await? {
                Ok(stats) => worker_stats.push(stats),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let validator_stats = validator_stats?;
        if let Some(e) = first_error {
            return Err(e);
        }

        let chain = self.shared.chain();
        chain.audit(self.checksum.as_ref())?;

        let outcome = if chain.height() > self.config.max_height {
            Outcome::Halted {
                height: chain.height(),
            }
        } else {
            Outcome::Interrupted
        };

        info!(
            ?outcome,
            height = chain.height(),
            head = %format_hash(chain.head().hash),
            "Simulation finished"
        );

        Ok(SimulationReport {
            outcome,
            chain,
            validator: validator_stats,
            workers: worker_stats,
            elapsed: started.elapsed(),
        })
    }

    /// Start the validator thread and wait until it is ready to validate
    async fn spawn_validator(&self) -> Result<thread::JoinHandle<ValidatorStats>> {
        let validator = Validator::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.checksum),
            self.config.max_height,
        );
        let hook = self.validator_hook.clone();
        let token = self.shutdown.clone();
        let handle = Handle::current();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("validator".to_string())
            .spawn(move || {
                if let Some(hook) = hook {
                    if let Err(e) = hook() {
                        let _ = ready_tx.send(Err(e));
                        return ValidatorStats::default();
                    }
                }
                let _ = ready_tx.send(Ok(()));
                handle.block_on(validator.run(token))
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(thread),
            Ok(Err(e)) => {
                error!(error = %e, "Validator thread setup failed");
                Err(e)
            }
            Err(_) => Err(Error::thread_panicked("validator")),
        }
    }

    fn spawn_workers(&self) -> Vec<JoinHandle<Result<WorkerStats>>> {
        let factory = WorkerFactory::new(Arc::clone(&self.shared), Arc::clone(&self.checksum));

        let honest = (1..=self.config.miners as u32).map(|id| factory.create_pow_worker(MinerId::new(id)));
        let faulty = factory.create_faulty_worker(self.config.faulty_miner_id(), self.config.faulty_interval);

        honest
            .chain(std::iter::once(faulty))
            .map(|worker| spawn_worker(worker, self.shutdown.clone()))
            .collect()
    }
}

fn spawn_worker(
    mut worker: Box<dyn MiningWorker>,
    shutdown: CancellationToken,
) -> JoinHandle<Result<WorkerStats>> {
    tokio::spawn(async move {
        let result = worker.run(shutdown.clone()).await;
        if let Err(e) = &result {
            error!(
                miner_id = %worker.miner_id(),
                worker_type = worker.worker_type(),
                error = %e,
                "Worker failed, stopping simulation"
            );
            shutdown.cancel();
        }
        result
    })
}
