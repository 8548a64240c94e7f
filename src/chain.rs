//! The authoritative chain of accepted headers
//!
//! Owned by the mining state and mutated only through the validator's accept
//! path. Entries are never removed or rewritten once accepted.

use crate::checksum::{header_checksum, Checksum};
use crate::{BlockHeader, Error, Result};
use serde::{Serialize, Serializer};

/// Genesis plus every accepted header, head last.
///
/// Genesis is held apart from the accepted blocks so a chain can never be
/// empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    genesis: BlockHeader,
    accepted: Vec<BlockHeader>,
}

impl Chain {
    /// Create a chain holding only the genesis block
    pub fn genesis(difficulty: u32) -> Self {
        Self {
            genesis: BlockHeader::genesis(difficulty),
            accepted: Vec::new(),
        }
    }

    /// Append `candidate` as the new head.
    ///
    /// Callers check the candidate first; nothing is validated here.
    pub fn accept(&mut self, candidate: BlockHeader) {
        self.accepted.push(candidate);
    }

    /// Most recently accepted block, genesis if none
    pub fn head(&self) -> &BlockHeader {
        self.accepted.last().unwrap_or(&self.genesis)
    }

    /// Height of the head
    pub fn height(&self) -> u64 {
        self.head().height
    }

    /// Number of blocks including genesis
    pub fn len(&self) -> usize {
        self.accepted.len() + 1
    }

    /// Always false: genesis is never removed
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Blocks newest-first
    pub fn iter(&self) -> impl Iterator<Item = &BlockHeader> + '_ {
        self.blocks().rev()
    }

    /// Blocks oldest-first, starting at genesis
    pub fn blocks(&self) -> impl DoubleEndedIterator<Item = &BlockHeader> + '_ {
        std::iter::once(&self.genesis).chain(&self.accepted)
    }

    /// Re-verify linkage, heights and proof of work of every block after genesis
    pub fn audit(&self, checksum: &dyn Checksum) -> Result<()> {
        for (index, (prev, block)) in self.blocks().zip(&self.accepted).enumerate() {
            let index = index + 1;

            if block.height != prev.height + 1 {
                return Err(Error::invalid_state(format!(
                    "block {} has height {}, expected {}",
                    index,
                    block.height,
                    prev.height + 1
                )));
            }

            if block.prev_hash != prev.hash {
                return Err(Error::invalid_state(format!(
                    "block {} links to {:#010x}, predecessor hash is {:#010x}",
                    index, block.prev_hash, prev.hash
                )));
            }

            let computed = header_checksum(checksum, block);
            if computed != block.hash {
                return Err(Error::invalid_state(format!(
                    "block {} claims hash {:#010x}, recomputed {:#010x}",
                    index, block.hash, computed
                )));
            }

            if !block.target()?.is_met_by(block.hash) {
                return Err(Error::invalid_state(format!(
                    "block {} hash {:#010x} does not meet difficulty {}",
                    index, block.hash, block.difficulty
                )));
            }
        }

        Ok(())
    }
}

impl Serialize for Chain {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.blocks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Crc32Checksum;
    use crate::{MinerId, Nonce, Template};
    use assert_matches::assert_matches;

    /// Mine `count` blocks on top of `chain` at a low difficulty
    fn extend(chain: &mut Chain, count: usize, difficulty: u32) {
        let crc = Crc32Checksum;
        for _ in 0..count {
            let template = Template::after(chain.head(), difficulty);
            let target = template.target().unwrap();
            let mut header = template.fill(MinerId::new(1), 1_700_000_000, Nonce::new(0));
            loop {
                let hash = header_checksum(&crc, &header);
                if target.is_met_by(hash) {
                    header.hash = hash;
                    break;
                }
                header.nonce.increment();
            }
            chain.accept(header);
        }
    }

    #[test]
    fn test_genesis_chain() {
        let chain = Chain::genesis(16);
        assert_eq!(chain.len(), 1);
        assert!(!chain.is_empty());
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.head().prev_hash, 0);
        assert!(chain.head().is_genesis());
        assert!(chain.audit(&Crc32Checksum).is_ok());
    }

    #[test]
    fn test_head_is_genesis_until_first_accept() {
        let mut chain = Chain::genesis(4);
        assert_eq!(*chain.head(), BlockHeader::genesis(4));
        assert_eq!(chain.blocks().count(), 1);

        let json = serde_json::to_value(&chain).unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(1));

        extend(&mut chain, 1, 4);
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.blocks().next(), Some(&BlockHeader::genesis(4)));
        assert_eq!(chain.iter().last(), Some(&BlockHeader::genesis(4)));
    }

    #[test]
    fn test_accept_appends_head() {
        let mut chain = Chain::genesis(4);
        extend(&mut chain, 3, 4);

        assert_eq!(chain.len(), 4);
        assert_eq!(chain.height(), 3);

        let heights: Vec<u64> = chain.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![3, 2, 1, 0]);

        let oldest: Vec<u64> = chain.blocks().map(|b| b.height).collect();
        assert_eq!(oldest, vec![0, 1, 2, 3]);

        assert!(chain.audit(&Crc32Checksum).is_ok());
    }

    #[test]
    fn test_audit_detects_broken_link() {
        let mut chain = Chain::genesis(4);
        extend(&mut chain, 2, 4);

        let mut forged = *chain.head();
        forged.height += 1;
        forged.prev_hash = forged.prev_hash.wrapping_add(1);
        chain.accept(forged);

        assert_matches!(chain.audit(&Crc32Checksum), Err(Error::InvalidState { .. }));
    }

    #[test]
    fn test_audit_detects_height_gap() {
        let mut chain = Chain::genesis(0);
        let mut skipped = Template::after(chain.head(), 0).fill(MinerId::new(1), 1, Nonce::new(0));
        skipped.height = 5;
        skipped.hash = header_checksum(&Crc32Checksum, &skipped);
        chain.accept(skipped);

        let err = chain.audit(&Crc32Checksum).unwrap_err();
        assert!(err.to_string().contains("height 5"));
    }

    #[test]
    fn test_chain_json_is_oldest_first() {
        let mut chain = Chain::genesis(4);
        extend(&mut chain, 1, 4);

        let json = serde_json::to_value(&chain).unwrap();
        let blocks = json.as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["height"], 0);
        assert_eq!(blocks[1]["height"], 1);
    }
}
