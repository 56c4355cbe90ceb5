use byteorder::ByteOrder;

use crypto::Hash256Data;

/// Target seconds between consecutive blocks
pub const DIFFICULTY_TARGET: u64 = 120;

/// Number of trailing blocks consulted when retargeting
pub const DIFFICULTY_WINDOW: usize = 720;

/// Number of outlier timestamps trimmed from each end of the window
pub const DIFFICULTY_CUT: usize = 60;

/// Wide u128 Multiplication
///
/// Returns a `(low, high)` tuple of the 256-bit product of two 128-bit
/// values. To be replaced with a standard widening_mul once stabilized
fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    const U64_MASK: u128 = (1 << 64) - 1;

    // Split both operands into 64-bit halves
    let a_lo = a & U64_MASK;
    let a_hi = a >> 64;
    let b_lo = b & U64_MASK;
    let b_hi = b >> 64;

    // lo * lo
    let res = a_lo * b_lo;
    let res_1_lo = res & U64_MASK;
    let carry = res >> 64;

    // hi * lo + carry
    let res = a_hi * b_lo + carry;
    let res_1_hi = res & U64_MASK;
    let res_1_of = res >> 64;

    // lo * hi
    let res = a_lo * b_hi;
    let res_2_lo = res & U64_MASK;
    let carry = res >> 64;

    // hi * hi + carry
    let res = a_hi * b_hi + carry;
    let res_2_hi = res & U64_MASK;
    let res_2_of = res >> 64;

    //  (high              , low             )
    //            res_1_of | res_1_hi res_1_lo
    // + res_2_of res_2_hi | res_2_lo

    let res = res_1_hi + res_2_lo;
    let carry = res >> 64;

    let low = res << 64 | res_1_lo;

    let res = res_1_of + res_2_hi + carry;
    let carry = res >> 64;

    let high = ((res_2_of + carry) << 64) | res;

    (low, high)
}

/// Checks a given hash for a certain difficulty
///
/// A given hash is valid for a certain difficulty if the relation
/// `hash * difficulty < 2^256` holds. In other words, the product of hash
/// and difficulty must fit without overflow into a 256-bit integer. The
/// hash is interpreted as a little-endian 256-bit value
pub fn check_hash_for_difficulty(hash: &Hash256Data, difficulty: u128) -> bool {
    let hash_lo = byteorder::LittleEndian::read_u128(&hash[..16]);
    let hash_hi = byteorder::LittleEndian::read_u128(&hash[16..]);

    // Check the higher half first, as most random hashes fail there
    let (_, will_carry) = hash_hi.overflowing_mul(difficulty);
    if will_carry {
        return false;
    }

    // Multiply low half
    let (_, carry_lo) = widening_mul(hash_lo, difficulty);
    // Multiply high half and fold in the carry
    let (res_hi, carry) = widening_mul(hash_hi, difficulty);

    if carry == 0 {
        let (_, will_carry) = res_hi.overflowing_add(carry_lo);
        !will_carry
    } else {
        false
    }
}

/// Computes the difficulty required of the next block
///
/// Takes the timestamps and cumulative difficulties of up to the last
/// [`DIFFICULTY_WINDOW`] main chain blocks, oldest first and index
/// aligned. Timestamps are sorted and the [`DIFFICULTY_CUT`] outliers on
/// each end are trimmed before relating elapsed time to accumulated work.
///
/// Returns 0 if the required difficulty cannot be represented, which
/// callers must treat as a retarget failure
pub fn next_difficulty(timestamps: &[u64], cumulative_difficulties: &[u128], target: u64) -> u128 {
    debug_assert_eq!(timestamps.len(), cumulative_difficulties.len());

    let start = timestamps.len().saturating_sub(DIFFICULTY_WINDOW);
    let mut timestamps = timestamps[start..].to_vec();
    let cumulative_difficulties = &cumulative_difficulties[start..];

    let length = timestamps.len();
    if length <= 1 {
        return 1;
    }
    timestamps.sort_unstable();

    let (cut_begin, cut_end) = if length <= DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT {
        (0, length)
    } else {
        let cut_begin = (length - (DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT) + 1) / 2;
        (cut_begin, cut_begin + (DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT))
    };

    let time_span = std::cmp::max(timestamps[cut_end - 1] - timestamps[cut_begin], 1);
    let total_work = cumulative_difficulties[cut_end - 1] - cumulative_difficulties[cut_begin];

    let (low, high) = widening_mul(total_work, u128::from(target));
    if high != 0 {
        return 0;
    }
    match low.checked_add(u128::from(time_span) - 1) {
        Some(rounded) => rounded / u128::from(time_span),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use crypto::Hash256;

    use super::*;

    #[test]
    fn widening_mul_works() {
        [
            // Multiply by 0
            (0, 0, (0, 0)),
            (u128::max_value(), 0, (0, 0)),
            // Multiply by 1
            (20, 1, (20, 0)),
            // Some arbitrary mid-size product
            (
                943_850_348_584_379,
                547_653_733_455_224,
                (516_903_167_225_249_755_920_782_345_896, 0),
            ),
            // Handle u128 overflow
            (u128::max_value(), 2, (u128::max_value() - 1, 1)),
            // Maximum possible result
            (
                u128::max_value(),
                u128::max_value(),
                (1, u128::max_value() - 1),
            ),
        ]
        .iter()
        .for_each(|(a, b, result)| {
            assert_eq!(widening_mul(*a, *b), *result);
        });
    }

    #[test]
    fn difficulty_check_works_for_valid_hashes() {
        [
            // The null hash satisfies any difficulty, including the
            // maximum representable one
            (
                "0000000000000000000000000000000000000000000000000000000000000000",
                u128::max_value(),
            ),
            // The largest hash satisfies the smallest difficulty
            (
                "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
                1,
            ),
            // 2^248 * 255 is one step below the 256-bit boundary
            (
                "00000000000000000000000000000000000000000000000000000000000000ff",
                255,
            ),
            // 2^128 * (2^127) = 2^255 fits
            (
                "0000000000000000000000000000000001000000000000000000000000000000",
                1 << 127,
            ),
        ]
        .iter()
        .map(|(hash, difficulty)| (Hash256::try_from(*hash).unwrap(), difficulty))
        .for_each(|(hash, difficulty)| {
            assert!(
                check_hash_for_difficulty(hash.data(), *difficulty),
                "hash {} should meet difficulty {}",
                hash,
                difficulty
            );
        });
    }

    #[test]
    fn difficulty_check_fails_for_invalid_hashes() {
        [
            // The largest hash fails any difficulty above 1
            (
                "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
                2,
            ),
            // 2^248 * 2^8 = 2^256 no longer fits
            (
                "00000000000000000000000000000000000000000000000000000000000000ff",
                257,
            ),
            // 2^129 * 2^127 = 2^256 overflows through the high half
            (
                "0000000000000000000000000000000002000000000000000000000000000000",
                1 << 127,
            ),
        ]
        .iter()
        .map(|(hash, difficulty)| (Hash256::try_from(*hash).unwrap(), difficulty))
        .for_each(|(hash, difficulty)| {
            assert!(
                !check_hash_for_difficulty(hash.data(), *difficulty),
                "hash {} should fail difficulty {}",
                hash,
                difficulty
            );
        });
    }

    fn chain_at_spacing(count: u64, spacing: u64) -> (Vec<u64>, Vec<u128>) {
        let timestamps = (0..count).map(|i| i * spacing).collect();
        let cumulative = (0..count).map(|i| u128::from(i) + 1).collect();
        (timestamps, cumulative)
    }

    #[test]
    fn short_history_gives_unit_difficulty() {
        assert_eq!(next_difficulty(&[], &[], DIFFICULTY_TARGET), 1);
        assert_eq!(next_difficulty(&[100], &[1], DIFFICULTY_TARGET), 1);
    }

    #[test]
    fn on_target_chain_holds_difficulty() {
        let (timestamps, cumulative) = chain_at_spacing(10, DIFFICULTY_TARGET);
        assert_eq!(next_difficulty(&timestamps, &cumulative, DIFFICULTY_TARGET), 1);
    }

    #[test]
    fn fast_chain_raises_difficulty() {
        let (timestamps, cumulative) = chain_at_spacing(10, DIFFICULTY_TARGET / 2);
        assert_eq!(next_difficulty(&timestamps, &cumulative, DIFFICULTY_TARGET), 2);
    }

    #[test]
    fn unsorted_timestamps_are_tolerated() {
        let (mut timestamps, cumulative) = chain_at_spacing(10, DIFFICULTY_TARGET);
        timestamps.swap(2, 7);
        assert_eq!(next_difficulty(&timestamps, &cumulative, DIFFICULTY_TARGET), 1);
    }

    #[test]
    fn identical_timestamps_clamp_the_span() {
        let timestamps = vec![500; 4];
        let cumulative = vec![1, 2, 3, 4];
        assert_eq!(
            next_difficulty(&timestamps, &cumulative, DIFFICULTY_TARGET),
            3 * u128::from(DIFFICULTY_TARGET)
        );
    }
}
