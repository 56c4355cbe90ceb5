use std::collections::HashMap;

use log::{debug, warn};

use crypto::Hash256;

/// Statically trusted `height -> hash` pins on the main chain
///
/// Blocks at a checkpointed height must carry the pinned hash, and
/// alternative branches may not fork below the highest checkpoint
#[derive(Default)]
pub struct Checkpoints {
    checkpoints: HashMap<u64, Hash256>,
}

impl Checkpoints {
    /// Creates an empty checkpoint set
    pub fn new() -> Checkpoints {
        Checkpoints::default()
    }

    /// Pins a block hash at a height
    ///
    /// # Errors
    /// If the height is already pinned to a different hash
    pub fn add_checkpoint(&mut self, height: u64, hash: Hash256) -> Result<(), ()> {
        if let Some(existing) = self.checkpoints.get(&height) {
            if *existing != hash {
                return Err(());
            }
        }
        self.checkpoints.insert(height, hash);
        Ok(())
    }

    /// Height of the highest pin, if any
    pub fn top_checkpoint_height(&self) -> Option<u64> {
        self.checkpoints.keys().max().copied()
    }

    /// True while the given height is at or below the highest pin
    pub fn in_checkpoint_zone(&self, height: u64) -> bool {
        matches!(self.top_checkpoint_height(), Some(top) if height <= top)
    }

    /// Checks a block hash against the pin at its height
    ///
    /// # Returns
    /// `Ok(true)` if the height is pinned and the hash matches,
    /// `Ok(false)` if the height is not pinned
    ///
    /// # Errors
    /// If the height is pinned to a different hash
    pub fn check_block(&self, height: u64, hash: &Hash256) -> Result<bool, ()> {
        match self.checkpoints.get(&height) {
            None => Ok(false),
            Some(expected) if expected == hash => {
                debug!("Checkpoint passed for height {} {}", height, hash);
                Ok(true)
            }
            Some(expected) => {
                warn!(
                    "Checkpoint failed for height {}. Expected hash: {}, fetched hash: {}",
                    height, expected, hash
                );
                Err(())
            }
        }
    }

    /// True if a branch forking off at `fork_height` is still allowed to
    /// exist given the pinned history
    pub fn is_alternative_block_allowed(&self, fork_height: u64) -> bool {
        match self.top_checkpoint_height() {
            None => true,
            Some(top) => fork_height >= top,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use super::*;

    fn hash(tag: &[u8]) -> Hash256 {
        crypto::cn_fast_hash(tag)
    }

    #[test]
    fn pins_are_enforced() {
        let mut checkpoints = Checkpoints::new();
        checkpoints.add_checkpoint(100, hash(b"pinned")).unwrap();

        assert_eq!(checkpoints.check_block(100, &hash(b"pinned")), Ok(true));
        assert_eq!(checkpoints.check_block(100, &hash(b"imposter")), Err(()));
        assert_eq!(checkpoints.check_block(50, &hash(b"anything")), Ok(false));
    }

    #[test]
    fn conflicting_pins_are_rejected() {
        let mut checkpoints = Checkpoints::new();
        checkpoints.add_checkpoint(100, hash(b"pinned")).unwrap();
        assert!(checkpoints.add_checkpoint(100, hash(b"other")).is_err());
        // Re-pinning the same hash is fine
        assert!(checkpoints.add_checkpoint(100, hash(b"pinned")).is_ok());
    }

    #[test]
    fn checkpoint_zone_tracks_the_highest_pin() {
        let mut checkpoints = Checkpoints::new();
        assert!(!checkpoints.in_checkpoint_zone(1));
        assert!(checkpoints.is_alternative_block_allowed(0));

        checkpoints
            .add_checkpoint(
                0,
                Hash256::try_from(
                    "7d491759c7534ca5a8be62ec7fa34dc939659f5afd4b4f1da2c671a84773cedc",
                )
                .unwrap(),
            )
            .unwrap();
        checkpoints.add_checkpoint(200, hash(b"later")).unwrap();

        assert!(checkpoints.in_checkpoint_zone(200));
        assert!(!checkpoints.in_checkpoint_zone(201));
        assert!(!checkpoints.is_alternative_block_allowed(150));
        assert!(checkpoints.is_alternative_block_allowed(200));
    }
}
