use common::{write_extra, TXExtra, TXIn, TXOut, TXOutTarget, Transaction};
use crypto::{KeyPair, PublicKey};
use ensure_macro::ensure;

use crate::config::{
    CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE, CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW,
};
use crate::error::{Error, Result};

/// Emission policy of the coin
///
/// Implemented by the coin definition; the chain only ever sees rewards
/// through this seam
pub trait EmissionCurve {
    /// The block reward before any size penalty, as a function of the
    /// coins already emitted
    fn base_reward(&self, already_generated_coins: u64) -> u64;
}

/// Computes the reward granted to the block's miner before fees
///
/// Blocks up to the effective median size get the full emission curve
/// reward. Beyond the median the reward shrinks quadratically, reaching
/// zero at twice the median; larger blocks are invalid outright.
/// Intermediate arithmetic is 128-bit
pub fn get_block_reward<C: EmissionCurve + ?Sized>(
    curve: &C,
    median_size: u64,
    current_block_size: u64,
    already_generated_coins: u64,
) -> Result<u64> {
    let base_reward = curve.base_reward(already_generated_coins);

    let median_size = std::cmp::max(median_size, CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE);
    if current_block_size <= median_size {
        return Ok(base_reward);
    }
    ensure!(
        current_block_size <= 2 * median_size,
        Error::ConsensusInvalid("block is more than twice the median size")
    );

    // base_reward * (2 * median - size) * size / median^2
    let median = u128::from(median_size);
    let size = u128::from(current_block_size);
    let penalized = u128::from(base_reward) * (2 * median - size) * size / (median * median);

    Ok(penalized as u64)
}

/// Builds the transaction minting a block's reward
///
/// The single generation input carries the block height, the unlock time
/// pins the reward down for the maturity window, and the whole
/// `reward + fee` is paid to `target` in one output
pub fn construct_miner_tx(
    height: u64,
    reward: u64,
    fee: u64,
    target: PublicKey,
) -> Result<Transaction> {
    let total = reward
        .checked_add(fee)
        .ok_or(Error::ConsensusInvalid("miner reward overflows"))?;

    let tx_key = KeyPair::generate();
    let mut tx = Transaction::default();
    tx.prefix.version = 1;
    tx.prefix.unlock_time = height + CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW;
    tx.prefix.inputs.push(TXIn::Gen(height));
    tx.prefix.outputs.push(TXOut {
        amount: total,
        target: TXOutTarget::ToKey { key: target },
    });
    tx.prefix.extra = write_extra(&[TXExtra::TxPublicKey(tx_key.public_key)]);

    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatCurve;

    impl EmissionCurve for FlatCurve {
        fn base_reward(&self, _already_generated_coins: u64) -> u64 {
            1_000_000
        }
    }

    #[test]
    fn small_blocks_get_the_full_reward() {
        let reward = get_block_reward(&FlatCurve, 0, 1000, 0).unwrap();
        assert_eq!(reward, 1_000_000);

        // Right at the free zone boundary
        let reward = get_block_reward(
            &FlatCurve,
            0,
            CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE,
            0,
        )
        .unwrap();
        assert_eq!(reward, 1_000_000);
    }

    #[test]
    fn oversize_blocks_pay_a_quadratic_penalty() {
        let median = CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE;

        // Half way into the penalty zone: reward * (2M - 1.5M) * 1.5M / M^2
        let reward = get_block_reward(&FlatCurve, median, median * 3 / 2, 0).unwrap();
        assert_eq!(reward, 750_000);

        // At exactly twice the median the reward is zero
        let reward = get_block_reward(&FlatCurve, median, median * 2, 0).unwrap();
        assert_eq!(reward, 0);
    }

    #[test]
    fn blocks_beyond_twice_the_median_are_invalid() {
        let median = CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE;
        assert!(matches!(
            get_block_reward(&FlatCurve, median, median * 2 + 1, 0),
            Err(Error::ConsensusInvalid(_))
        ));
    }

    #[test]
    fn miner_tx_shape() {
        let target = KeyPair::generate().public_key;
        let tx = construct_miner_tx(42, 1_000_000, 250, target).unwrap();

        assert!(tx.is_coinbase());
        assert!(matches!(tx.prefix.inputs.as_slice(), [TXIn::Gen(42)]));
        assert_eq!(tx.output_amount(), Some(1_000_250));
        assert_eq!(
            tx.prefix.unlock_time,
            42 + CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW
        );
        assert!(common::parse_extra(&tx.prefix.extra).is_ok());
    }
}
