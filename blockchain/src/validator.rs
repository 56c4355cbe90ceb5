//! Stateless consensus rule checks
//!
//! Everything here operates on a read-only view of chain state and
//! reports failures through the error taxonomy; nothing in this module
//! mutates an index.

use rayon::prelude::*;

use blockchain_db::{BlockchainDB, TxEntry};
use common::{parse_extra, Block, CancelToken, TXIn, TXOut, TXOutTarget, Transaction};
use crypto::{Hash256, PublicKey, Signature};
use ensure_macro::ensure;

use crate::config::{
    BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW, CRYPTONOTE_BLOCK_FUTURE_TIME_LIMIT,
    CRYPTONOTE_DEFAULT_TX_SPENDABLE_AGE, CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_BLOCKS,
    CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_SECONDS, CRYPTONOTE_MAX_BLOCK_NUMBER,
    CRYPTONOTE_MAX_TX_SIZE, CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW,
};
use crate::error::{Error, Result};

/// One ring signature check, prepared against the output index and ready
/// to verify in parallel with its siblings
pub struct RingSignatureJob {
    prefix_hash: Hash256,
    key_image: crypto::KeyImage,
    ring: Vec<PublicKey>,
    signatures: Vec<Signature>,
}

/// Median in the epee style: mean of the middle pair for even counts
pub fn median(values: &mut Vec<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2
    } else {
        values[mid]
    }
}

/// Checks a block timestamp against the recent median and the node clock
///
/// `last_timestamps` are the timestamps of up to the last
/// [`BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW`] main chain blocks
pub fn check_block_timestamp(last_timestamps: &[u64], block: &Block, now: u64) -> Result<()> {
    ensure!(
        block.header.timestamp <= now + CRYPTONOTE_BLOCK_FUTURE_TIME_LIMIT,
        Error::ConsensusInvalid("block timestamp is too far in the future")
    );

    let mut window: Vec<u64> = last_timestamps
        .iter()
        .rev()
        .take(BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW)
        .copied()
        .collect();
    if !window.is_empty() {
        ensure!(
            block.header.timestamp >= median(&mut window),
            Error::ConsensusInvalid("block timestamp is below the chain median")
        );
    }
    Ok(())
}

/// Checks a proof-of-work hash against the required difficulty
pub fn check_proof_of_work(pow_hash: &Hash256, difficulty: u128) -> Result<()> {
    ensure!(
        difficulty != 0,
        Error::ConsensusInvalid("required difficulty is unrepresentable")
    );
    ensure!(
        common::difficulty::check_hash_for_difficulty(pow_hash.data(), difficulty),
        Error::ConsensusInvalid("proof of work does not meet the difficulty")
    );
    Ok(())
}

/// Structural checks that need nothing but the transaction itself
pub fn check_tx_syntax(tx: &Transaction) -> Result<()> {
    ensure!(
        tx.prefix.version == 1,
        Error::FormatInvalid("unsupported transaction version")
    );
    ensure!(
        !tx.prefix.inputs.is_empty(),
        Error::FormatInvalid("transaction has no inputs")
    );
    ensure!(
        !tx.prefix.outputs.is_empty(),
        Error::FormatInvalid("transaction has no outputs")
    );
    ensure!(
        tx.blob_size() <= CRYPTONOTE_MAX_TX_SIZE,
        Error::FormatInvalid("transaction is too large")
    );

    for output in &tx.prefix.outputs {
        ensure!(
            output.amount > 0,
            Error::FormatInvalid("output amount is zero")
        );
        let TXOutTarget::ToKey { key } = &output.target;
        ensure!(
            key.decompress().is_some(),
            Error::FormatInvalid("output target is not on the curve")
        );
    }
    ensure!(
        tx.output_amount().is_some(),
        Error::ConsensusInvalid("output amounts overflow")
    );
    ensure!(
        tx.input_amount().is_some(),
        Error::ConsensusInvalid("input amounts overflow")
    );
    ensure!(
        parse_extra(&tx.prefix.extra).is_ok(),
        Error::FormatInvalid("malformed extra field")
    );

    let mut seen_key_images = std::collections::HashSet::new();
    for input in &tx.prefix.inputs {
        match input {
            TXIn::Gen(_) => {
                ensure!(
                    tx.is_coinbase(),
                    Error::FormatInvalid("generation input outside a miner transaction")
                );
            }
            TXIn::FromKey {
                amount,
                key_offsets,
                key_image,
            } => {
                ensure!(*amount > 0, Error::FormatInvalid("input amount is zero"));
                ensure!(
                    !key_offsets.is_empty(),
                    Error::FormatInvalid("input has an empty ring")
                );
                ensure!(seen_key_images.insert(*key_image), Error::DoubleSpend);
            }
        }
    }

    if tx.is_coinbase() {
        ensure!(
            tx.signatures.is_empty(),
            Error::FormatInvalid("miner transaction carries signatures")
        );
    } else {
        ensure!(
            tx.signatures.len() == tx.prefix.inputs.len(),
            Error::FormatInvalid("one signature vector per input is required")
        );
    }
    Ok(())
}

/// Structural checks of a block's miner transaction
pub fn prevalidate_miner_tx(block: &Block, height: u64) -> Result<()> {
    check_tx_syntax(&block.miner_tx)?;
    match block.miner_tx.prefix.inputs.as_slice() {
        [TXIn::Gen(input_height)] => {
            ensure!(
                *input_height == height,
                Error::ConsensusInvalid("miner transaction height mismatch")
            );
        }
        _ => {
            return Err(Error::ConsensusInvalid(
                "miner transaction must have exactly one generation input",
            ))
        }
    }
    ensure!(
        block.miner_tx.prefix.unlock_time == height + CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW,
        Error::ConsensusInvalid("miner transaction unlock time mismatch")
    );
    Ok(())
}

/// Interprets an unlock time and decides whether it has passed
///
/// Values below [`CRYPTONOTE_MAX_BLOCK_NUMBER`] are block heights,
/// anything at or above it is UNIX seconds
pub fn is_unlocked(unlock_time: u64, current_height: u64, now: u64) -> bool {
    if unlock_time < CRYPTONOTE_MAX_BLOCK_NUMBER {
        current_height + CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_BLOCKS >= unlock_time
    } else {
        now + CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_SECONDS >= unlock_time
    }
}

/// Decodes relative ring offsets into absolute output index positions
pub fn relative_to_absolute_offsets(offsets: &[u64]) -> Result<Vec<u64>> {
    let mut absolute = Vec::with_capacity(offsets.len());
    let mut position: u64 = 0;
    for (i, offset) in offsets.iter().enumerate() {
        if i > 0 {
            ensure!(
                *offset > 0,
                Error::FormatInvalid("ring offsets are not strictly increasing")
            );
        }
        position = position
            .checked_add(*offset)
            .ok_or(Error::FormatInvalid("ring offsets overflow"))?;
        absolute.push(position);
    }
    Ok(absolute)
}

/// Walks the outputs a ring input references, handing each to `visitor`
///
/// Decouples index traversal from verification policy: the visitor
/// decides what to do with each `(owning tx, output)` pair and may abort
/// the scan with an error
pub fn scan_output_keys<F>(
    db: &dyn BlockchainDB,
    amount: u64,
    absolute_offsets: &[u64],
    mut visitor: F,
) -> Result<()>
where
    F: FnMut(&TxEntry, &TXOut) -> Result<()>,
{
    for offset in absolute_offsets {
        let (tx_hash, out_index) = db
            .get_output(amount, *offset)
            .ok_or(Error::ConsensusInvalid("ring references an unknown output"))?;
        let entry = db.get_tx(&tx_hash).ok_or_else(|| {
            Error::Storage(blockchain_db::Error::Corruption(format!(
                "output index references missing transaction {}",
                tx_hash
            )))
        })?;
        let output = entry.tx.prefix.outputs.get(out_index as usize).ok_or_else(|| {
            Error::Storage(blockchain_db::Error::Corruption(format!(
                "output index past the end of transaction {}",
                tx_hash
            )))
        })?;
        visitor(&entry, output)?;
    }
    Ok(())
}

/// Runs every per-input check of a transaction except the ring signature
/// arithmetic itself, which is returned as jobs for parallel execution
///
/// # Returns
/// The transaction's fee and one verification job per ring input
pub fn prepare_tx_input_checks(
    db: &dyn BlockchainDB,
    current_height: u64,
    now: u64,
    tx: &Transaction,
    cancel: &CancelToken,
) -> Result<(u64, Vec<RingSignatureJob>)> {
    ensure!(
        !tx.is_coinbase(),
        Error::FormatInvalid("unexpected miner transaction")
    );
    let prefix_hash = tx.prefix_hash();
    let mut jobs = Vec::with_capacity(tx.prefix.inputs.len());

    for (input_index, input) in tx.prefix.inputs.iter().enumerate() {
        ensure!(!cancel.is_cancelled(), Error::Cancelled);

        let (amount, key_offsets, key_image) = match input {
            TXIn::FromKey {
                amount,
                key_offsets,
                key_image,
            } => (*amount, key_offsets, key_image),
            TXIn::Gen(_) => {
                return Err(Error::FormatInvalid(
                    "generation input outside a miner transaction",
                ))
            }
        };

        ensure!(
            crypto::check_key_image(key_image),
            Error::ConsensusInvalid("key image is not on the curve")
        );
        ensure!(!db.contains_key_image(key_image), Error::DoubleSpend);

        let absolute_offsets = relative_to_absolute_offsets(key_offsets)?;
        let mut ring = Vec::with_capacity(absolute_offsets.len());
        scan_output_keys(db, amount, &absolute_offsets, |entry, output| {
            ensure!(
                entry.block_height + CRYPTONOTE_DEFAULT_TX_SPENDABLE_AGE <= current_height,
                Error::ConsensusInvalid("ring member is not yet mature")
            );
            ensure!(
                is_unlocked(entry.tx.prefix.unlock_time, current_height, now),
                Error::ConsensusInvalid("ring member is still locked")
            );
            let TXOutTarget::ToKey { key } = &output.target;
            ring.push(*key);
            Ok(())
        })?;

        jobs.push(RingSignatureJob {
            prefix_hash,
            key_image: *key_image,
            ring,
            signatures: tx.signatures.get(input_index).cloned().unwrap_or_default(),
        });
    }

    let fee = tx
        .fee()
        .ok_or(Error::ConsensusInvalid("outputs exceed inputs"))?;
    Ok((fee, jobs))
}

/// Verifies prepared ring signature jobs across a worker pool
///
/// All jobs are joined before returning. A failed or cancelled sibling
/// stops the batch early; stragglers may still finish but their results
/// are discarded
pub fn verify_ring_signature_jobs(jobs: Vec<RingSignatureJob>, cancel: &CancelToken) -> Result<()> {
    jobs.par_iter().try_for_each(|job| {
        ensure!(!cancel.is_cancelled(), Error::Cancelled);
        ensure!(
            crypto::check_ring_signature(
                &job.prefix_hash,
                &job.key_image,
                &job.ring,
                &job.signatures
            ),
            Error::ConsensusInvalid("ring signature does not verify")
        );
        Ok(())
    })
}

/// Full transaction check against the chain: syntax, per-input rules and
/// every ring signature
///
/// # Returns
/// The transaction's fee
pub fn check_tx_full(
    db: &dyn BlockchainDB,
    current_height: u64,
    now: u64,
    tx: &Transaction,
    cancel: &CancelToken,
) -> Result<u64> {
    check_tx_syntax(tx)?;
    let (fee, jobs) = prepare_tx_input_checks(db, current_height, now, tx, cancel)?;
    verify_ring_signature_jobs(jobs, cancel)?;
    Ok(fee)
}

#[cfg(test)]
mod tests {
    use common::TransactionPrefix;
    use crypto::KeyPair;

    use super::*;

    fn key_output(amount: u64) -> TXOut {
        TXOut {
            amount,
            target: TXOutTarget::ToKey {
                key: KeyPair::generate().public_key,
            },
        }
    }

    fn spend_input(amount: u64) -> TXIn {
        TXIn::FromKey {
            amount,
            key_offsets: vec![0],
            key_image: crypto::generate_key_image(&KeyPair::generate()),
        }
    }

    #[test]
    fn median_matches_epee_semantics() {
        assert_eq!(median(&mut vec![5]), 5);
        assert_eq!(median(&mut vec![9, 1]), 5);
        assert_eq!(median(&mut vec![3, 1, 9]), 3);
        assert_eq!(median(&mut vec![4, 1, 9, 3]), 3);
    }

    #[test]
    fn unlock_time_boundary_interpretation() {
        // One below the boundary is a block height
        assert!(is_unlocked(
            CRYPTONOTE_MAX_BLOCK_NUMBER - 1,
            CRYPTONOTE_MAX_BLOCK_NUMBER - 2,
            0
        ));
        assert!(!is_unlocked(CRYPTONOTE_MAX_BLOCK_NUMBER - 1, 100, 0));

        // The boundary itself is interpreted as a timestamp
        assert!(is_unlocked(
            CRYPTONOTE_MAX_BLOCK_NUMBER,
            100,
            CRYPTONOTE_MAX_BLOCK_NUMBER
        ));
        assert!(!is_unlocked(CRYPTONOTE_MAX_BLOCK_NUMBER, 100, 0));
    }

    #[test]
    fn relative_offsets_accumulate() {
        assert_eq!(
            relative_to_absolute_offsets(&[3, 1, 5]).unwrap(),
            vec![3, 4, 9]
        );
        // A zero first offset is the first output of the amount
        assert_eq!(relative_to_absolute_offsets(&[0, 2]).unwrap(), vec![0, 2]);
        assert!(matches!(
            relative_to_absolute_offsets(&[3, 0]),
            Err(Error::FormatInvalid(_))
        ));
        assert!(matches!(
            relative_to_absolute_offsets(&[u64::max_value(), 1]),
            Err(Error::FormatInvalid(_))
        ));
    }

    #[test]
    fn syntax_rejects_empty_transactions() {
        let tx = Transaction::default();
        assert!(matches!(
            check_tx_syntax(&tx),
            Err(Error::FormatInvalid("transaction has no inputs"))
        ));

        let mut tx = Transaction {
            prefix: TransactionPrefix {
                version: 1,
                ..Default::default()
            },
            signatures: Vec::new(),
        };
        tx.prefix.inputs.push(spend_input(10));
        assert!(matches!(
            check_tx_syntax(&tx),
            Err(Error::FormatInvalid("transaction has no outputs"))
        ));
    }

    #[test]
    fn syntax_rejects_duplicate_key_images() {
        let mut tx = Transaction::default();
        tx.prefix.version = 1;
        let input = spend_input(10);
        tx.prefix.inputs.push(input.clone());
        tx.prefix.inputs.push(input);
        tx.prefix.outputs.push(key_output(5));
        tx.signatures = vec![Vec::new(), Vec::new()];

        assert!(matches!(check_tx_syntax(&tx), Err(Error::DoubleSpend)));
    }

    #[test]
    fn syntax_accepts_the_maximum_output_sum() {
        let mut tx = Transaction::default();
        tx.prefix.version = 1;
        tx.prefix.inputs.push(spend_input(u64::max_value()));
        tx.prefix.outputs.push(key_output(u64::max_value() - 1));
        tx.prefix.outputs.push(key_output(1));
        tx.signatures = vec![Vec::new()];

        // Sums to exactly 2^64 - 1
        assert!(check_tx_syntax(&tx).is_ok());

        // One more unit overflows and is rejected
        tx.prefix.outputs.push(key_output(1));
        assert!(matches!(
            check_tx_syntax(&tx),
            Err(Error::ConsensusInvalid("output amounts overflow"))
        ));
    }

    #[test]
    fn syntax_rejects_zero_amounts() {
        let mut tx = Transaction::default();
        tx.prefix.version = 1;
        tx.prefix.inputs.push(spend_input(10));
        tx.prefix.outputs.push(key_output(0));
        tx.signatures = vec![Vec::new()];

        assert!(matches!(
            check_tx_syntax(&tx),
            Err(Error::FormatInvalid("output amount is zero"))
        ));
    }

    #[test]
    fn timestamp_checks_use_the_window_median() {
        let mut block = Block {
            header: common::BlockHeader {
                major_version: 1,
                minor_version: 1,
                timestamp: 1000,
                prev_id: Hash256::null_hash(),
                nonce: 0,
            },
            miner_tx: Transaction::default(),
            tx_hashes: Vec::new(),
        };

        // Last 11 timestamps are 890..=990, median 940
        let history: Vec<u64> = (0..20).map(|i| 800 + i * 10).collect();
        assert!(check_block_timestamp(&history, &block, 1000).is_ok());

        // Below the median of the last 11
        block.header.timestamp = 930;
        assert!(check_block_timestamp(&history, &block, 1000).is_err());

        // Too far in the future
        block.header.timestamp = 1000 + CRYPTONOTE_BLOCK_FUTURE_TIME_LIMIT + 1;
        assert!(check_block_timestamp(&history, &block, 1000).is_err());
    }
}
