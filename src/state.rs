//! Shared mining state
//!
//! The template, the candidate mailbox and the chain form one resource behind
//! one lock. Workers take the lock to snapshot the template and to submit a
//! candidate; the validator holds it across check, accept and republish.
//!
//! The mailbox is a single slot with an overwrite-on-full policy: a submission
//! replaces any candidate the validator has not consumed yet. Wakeups coalesce
//! the same way through [`Notify`], which keeps at most one permit. An
//! overwritten candidate is never examined, which can cost progress but never
//! lets an invalid header in.

use crate::chain::Chain;
use crate::utils::format_hash;
use crate::{BlockHeader, Template};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Template, mailbox and chain
#[derive(Debug, Clone)]
pub struct MiningState {
    chain: Chain,
    template: Template,
    mailbox: Option<BlockHeader>,
    difficulty: u32,
}

impl MiningState {
    /// State for a fresh chain holding only genesis
    pub fn new(difficulty: u32) -> Self {
        let chain = Chain::genesis(difficulty);
        let template = Template::after(chain.head(), difficulty);

        Self {
            chain,
            template,
            mailbox: None,
            difficulty,
        }
    }

    /// Header currently being raced for
    pub fn template(&self) -> Template {
        self.template
    }

    /// Most recently accepted block
    pub fn head(&self) -> &BlockHeader {
        self.chain.head()
    }

    /// Accepted chain
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Difficulty every block must meet
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Candidate awaiting validation, if any
    pub fn pending(&self) -> Option<&BlockHeader> {
        self.mailbox.as_ref()
    }

    /// Put a candidate in the mailbox, returning the one it displaced
    pub fn submit(&mut self, candidate: BlockHeader) -> Option<BlockHeader> {
        self.mailbox.replace(candidate)
    }

    /// Remove the pending candidate
    pub fn take_candidate(&mut self) -> Option<BlockHeader> {
        self.mailbox.take()
    }

    /// Append a checked candidate, clear the mailbox and publish the next template
    pub(crate) fn extend(&mut self, candidate: BlockHeader) -> Template {
        self.chain.accept(candidate);
        self.template = Template::after(self.chain.head(), self.difficulty);
        self.mailbox = None;
        self.template
    }
}

/// Outcome of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Candidate that was still unexamined and got overwritten
    pub displaced: Option<BlockHeader>,
}

/// [`MiningState`] behind a single lock, plus the submission signal
#[derive(Debug)]
pub struct SharedState {
    inner: Mutex<MiningState>,
    submitted: Notify,
    // Written only under `inner`'s lock.
    template_height: AtomicU64,
}

impl SharedState {
    /// Shared state for a fresh chain
    pub fn new(difficulty: u32) -> Arc<Self> {
        Arc::new(Self::from_state(MiningState::new(difficulty)))
    }

    /// Wrap an existing state
    pub fn from_state(state: MiningState) -> Self {
        let height = state.template().height;
        Self {
            inner: Mutex::new(state),
            submitted: Notify::new(),
            template_height: AtomicU64::new(height),
        }
    }

    /// Consistent snapshot of the current template
    pub fn snapshot(&self) -> Template {
        self.inner.lock().template()
    }

    /// Height of the current template, readable without the lock.
    ///
    /// Workers poll this once per search attempt to notice that the block
    /// they are mining was already won.
    pub fn template_height(&self) -> u64 {
        self.template_height.load(Ordering::Acquire)
    }

    /// Write a candidate into the mailbox and wake the validator
    pub fn submit(&self, candidate: BlockHeader) -> Submission {
        let displaced = self.inner.lock().submit(candidate);

        if let Some(lost) = displaced {
            debug!(
                miner_id = %lost.miner_id,
                height = lost.height,
                hash = %format_hash(lost.hash),
                "Unexamined candidate overwritten in mailbox"
            );
        }

        self.submitted.notify_one();
        Submission { displaced }
    }

    /// Wait until a submission has been signalled since the last wakeup
    pub async fn wait_for_submission(&self) {
        self.submitted.notified().await;
    }

    /// Lock the whole state
    pub fn lock(&self) -> MutexGuard<'_, MiningState> {
        self.inner.lock()
    }

    /// Accept a checked candidate while the caller holds the lock
    pub(crate) fn extend(&self, state: &mut MiningState, candidate: BlockHeader) -> Template {
        let template = state.extend(candidate);
        self.template_height.store(template.height, Ordering::Release);
        template
    }

    /// Copy of the accepted chain
    pub fn chain(&self) -> Chain {
        self.inner.lock().chain().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MinerId, Nonce};
    use std::time::Duration;

    fn candidate(template: Template, miner: u32, hash: u32) -> BlockHeader {
        let mut header = template.fill(MinerId::new(miner), 1_700_000_000, Nonce::new(0));
        header.hash = hash;
        header
    }

    #[test]
    fn test_initial_template() {
        let state = MiningState::new(16);
        let template = state.template();

        assert_eq!(template.height, 1);
        assert_eq!(template.prev_hash, 0);
        assert_eq!(template.difficulty, 16);
        assert!(state.pending().is_none());
        assert_eq!(state.head().height, 0);
    }

    #[test]
    fn test_mailbox_overwrite() {
        let mut state = MiningState::new(16);
        let template = state.template();

        assert!(state.submit(candidate(template, 1, 10)).is_none());
        let displaced = state.submit(candidate(template, 2, 20)).unwrap();
        assert_eq!(displaced.miner_id, MinerId::new(1));

        let pending = state.take_candidate().unwrap();
        assert_eq!(pending.miner_id, MinerId::new(2));
        assert!(state.take_candidate().is_none());
    }

    #[test]
    fn test_extend_republishes_template() {
        let mut state = MiningState::new(16);
        let accepted = candidate(state.template(), 1, 40_000);
        state.submit(accepted);

        let template = state.extend(accepted);
        assert_eq!(template.height, 2);
        assert_eq!(template.prev_hash, 40_000);
        assert_eq!(state.chain().len(), 2);
        assert!(state.pending().is_none());
    }

    #[test]
    fn test_shared_template_height_follows_extend() {
        let shared = SharedState::new(16);
        assert_eq!(shared.template_height(), 1);

        let accepted = candidate(shared.snapshot(), 1, 40_000);
        {
            let mut state = shared.lock();
            shared.extend(&mut state, accepted);
        }

        assert_eq!(shared.template_height(), 2);
        assert_eq!(shared.snapshot().prev_hash, 40_000);
        assert_eq!(shared.chain().height(), 1);
    }

    #[test]
    fn test_shared_submit_reports_displaced() {
        let shared = SharedState::new(16);
        let template = shared.snapshot();

        assert_eq!(shared.submit(candidate(template, 1, 1)).displaced, None);
        let second = shared.submit(candidate(template, 2, 2));
        assert_eq!(second.displaced.map(|c| c.miner_id), Some(MinerId::new(1)));
    }

    #[tokio::test]
    async fn test_submission_signal_is_not_lost() {
        let shared = SharedState::new(16);

        // Submitted before anyone waits: the stored permit wakes the next wait.
        shared.submit(candidate(shared.snapshot(), 1, 1));
        tokio::time::timeout(Duration::from_secs(1), shared.wait_for_submission())
            .await
            .expect("permit should be stored");
    }

    #[tokio::test]
    async fn test_submission_signals_coalesce() {
        let shared = SharedState::new(16);
        let template = shared.snapshot();

        shared.submit(candidate(template, 1, 1));
        shared.submit(candidate(template, 2, 2));

        shared.wait_for_submission().await;
        let second_wait =
            tokio::time::timeout(Duration::from_millis(50), shared.wait_for_submission()).await;
        assert!(second_wait.is_err(), "two submissions leave a single permit");
    }
}
