//! Transaction checks.
//!
//! Pure functions over one transaction; anything that needs the UTXO set
//! or the header index takes its context as arguments.

use std::collections::HashSet;

use tanager_chain::amount::{Amount, MAX_MONEY};
use tanager_chain::block::Height;
use tanager_chain::parameters::{
    SEQUENCE_FINAL, SEQUENCE_LOCKTIME_DISABLE, SEQUENCE_LOCKTIME_MASK, SEQUENCE_LOCKTIME_TYPE,
};
use tanager_chain::transaction::{LockTime, Transaction, MAX_TX_BYTES};
use tanager_chain::transparent;

use crate::error::TransactionError;

/// Every transaction names at least one input and one output.
pub fn has_inputs_and_outputs(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() {
        Err(TransactionError::EmptyInputs)
    } else if tx.outputs.is_empty() {
        Err(TransactionError::EmptyOutputs)
    } else {
        Ok(())
    }
}

/// No outpoint may be consumed twice within one transaction.
pub fn no_duplicate_inputs(tx: &Transaction) -> Result<(), TransactionError> {
    let mut seen = HashSet::new();
    for input in tx.inputs.iter() {
        match input {
            transparent::Input::PrevOut { outpoint, .. } => {
                if !seen.insert(*outpoint) {
                    return Err(TransactionError::DuplicateInput);
                }
            }
            // Two coinbase inputs also collide (both are null).
            transparent::Input::Coinbase { .. } => {
                if !seen.insert(transparent::OutPoint::null()) {
                    return Err(TransactionError::DuplicateInput);
                }
            }
        }
    }
    Ok(())
}

/// Serialized size bound.
pub fn size_is_valid(tx: &Transaction) -> Result<(), TransactionError> {
    let size = tx.serialized_len();
    if size > MAX_TX_BYTES {
        return Err(TransactionError::OversizeTransaction(size));
    }
    Ok(())
}

/// The sum of all output values stays inside the monetary range.
/// Individual values are in range by construction ([`Amount`]).
pub fn output_total_in_range(tx: &Transaction) -> Result<Amount, TransactionError> {
    let total: Result<Amount, _> = tx.outputs.iter().map(|output| output.value).sum();
    total.map_err(|_| TransactionError::TotalOverflow)
}

/// Is the transaction final in a block at `height` whose median-time-past
/// is `median_time`?
///
/// A lock time of zero, or all-final sequences, disables the check; the
/// raw lock time is then compared as a height or a time depending on the
/// threshold.
pub fn is_final(tx: &Transaction, height: Height, median_time: u32) -> bool {
    if tx.lock_time.raw() == 0 {
        return true;
    }
    let threshold_passed = match tx.lock_time {
        LockTime::Height(lock_height) => lock_height <= height,
        LockTime::Time(lock_time) => lock_time <= median_time,
    };
    if threshold_passed {
        return true;
    }
    tx.inputs
        .iter()
        .all(|input| input.sequence() == SEQUENCE_FINAL)
}

/// Check absolute lock-time finality, as a `Result`.
pub fn lock_time_is_satisfied(
    tx: &Transaction,
    height: Height,
    median_time: u32,
) -> Result<(), TransactionError> {
    if is_final(tx, height, median_time) {
        Ok(())
    } else {
        Err(TransactionError::NotFinal(height))
    }
}

/// BIP-68 relative lock-times.
///
/// For version-2+ transactions, each input's sequence can demand that
/// its prevout has aged a number of blocks, or of 512-second granules of
/// median-time-past. `prevout_heights` gives the confirmation height of
/// each input's prevout (in input order); `mtp_at` resolves a height to
/// the median-time-past of the block *at* that height.
pub fn sequence_locks_satisfied(
    tx: &Transaction,
    prevout_heights: &[Height],
    spend_height: Height,
    spend_mtp: u32,
    mtp_at: impl Fn(Height) -> u32,
) -> Result<(), TransactionError> {
    if tx.version < 2 {
        return Ok(());
    }

    for (input, &prevout_height) in tx.inputs.iter().zip(prevout_heights.iter()) {
        let sequence = input.sequence();
        if sequence & SEQUENCE_LOCKTIME_DISABLE != 0 {
            continue;
        }
        let value = sequence & SEQUENCE_LOCKTIME_MASK;

        if sequence & SEQUENCE_LOCKTIME_TYPE != 0 {
            // Time-based: the prevout's anchor is the MTP of the block
            // before it was confirmed.
            let anchor = mtp_at(prevout_height.checked_sub(1).unwrap_or(Height(0)));
            let required = anchor.saturating_add(value << 9);
            if spend_mtp < required {
                return Err(TransactionError::SequenceLocked(spend_height));
            }
        } else {
            // Height-based: the prevout must be `value` blocks deep.
            let required = prevout_height.0.saturating_add(value);
            if spend_height.0 < required {
                return Err(TransactionError::SequenceLocked(spend_height));
            }
        }
    }
    Ok(())
}

/// Overflow-checked fee: `inputs − outputs`, non-negative.
pub fn fee(input_sum: Amount, output_sum: Amount) -> Result<Amount, TransactionError> {
    input_sum.checked_sub(output_sum).map_err(|_| {
        TransactionError::InsufficientFunds(output_sum.satoshis() - input_sum.satoshis())
    })
}

/// Guard against nonsense monetary sums from other layers.
pub fn amount_in_range(satoshis: i64) -> Result<(), TransactionError> {
    if satoshis < 0 {
        Err(TransactionError::NegativeValue)
    } else if satoshis > MAX_MONEY {
        Err(TransactionError::ValueTooLarge)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;
    use tanager_chain::transaction::Txid;
    use tanager_chain::transparent::{Input, OutPoint, Output, Script};

    fn tx_with(inputs: Vec<Input>, lock_time: LockTime, version: i32) -> Transaction {
        Transaction::new(
            version,
            inputs,
            vec![Output {
                value: Amount::try_from(1_000i64).unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            lock_time,
        )
    }

    fn input(sequence: u32) -> Input {
        Input::PrevOut {
            outpoint: OutPoint {
                txid: Txid([1u8; 32]),
                index: 0,
            },
            unlock_script: Script(vec![]),
            sequence,
        }
    }

    #[test]
    fn empty_sides_are_rejected() {
        tanager_test::init();

        let no_inputs = Transaction::new(
            1,
            vec![],
            vec![Output {
                value: Amount::try_from(1i64).unwrap(),
                lock_script: Script(vec![]),
            }],
            LockTime::unlocked(),
        );
        assert_eq!(
            has_inputs_and_outputs(&no_inputs),
            Err(TransactionError::EmptyInputs)
        );

        let no_outputs = Transaction::new(1, vec![input(0)], vec![], LockTime::unlocked());
        assert_eq!(
            has_inputs_and_outputs(&no_outputs),
            Err(TransactionError::EmptyOutputs)
        );
    }

    #[test]
    fn duplicate_inputs_are_rejected() {
        tanager_test::init();
        let tx = tx_with(vec![input(0), input(0)], LockTime::unlocked(), 1);
        assert_eq!(
            no_duplicate_inputs(&tx),
            Err(TransactionError::DuplicateInput)
        );
    }

    #[test]
    fn time_lock_scenario() {
        tanager_test::init();

        // Lock time 500,000,001 with a non-final sequence.
        let tx = tx_with(vec![input(0)], LockTime::from_raw(500_000_001), 1);
        assert!(!is_final(&tx, Height(100), 500_000_000));
        assert!(is_final(&tx, Height(100), 500_000_001));

        // A final sequence disables the lock entirely.
        let tx = tx_with(
            vec![input(SEQUENCE_FINAL)],
            LockTime::from_raw(500_000_001),
            1,
        );
        assert!(is_final(&tx, Height(100), 0));
    }

    #[test]
    fn height_lock() {
        tanager_test::init();
        let tx = tx_with(vec![input(0)], LockTime::from_raw(150), 1);
        assert!(!is_final(&tx, Height(149), 0));
        assert!(is_final(&tx, Height(150), 0));
    }

    #[test]
    fn sequence_lock_height_based() {
        tanager_test::init();

        // Input demands its prevout be 10 blocks deep.
        let tx = tx_with(vec![input(10)], LockTime::unlocked(), 2);
        let prevouts = [Height(100)];

        assert!(
            sequence_locks_satisfied(&tx, &prevouts, Height(109), 0, |_| 0).is_err(),
            "9 blocks deep is not enough"
        );
        assert!(sequence_locks_satisfied(&tx, &prevouts, Height(110), 0, |_| 0).is_ok());

        // Version-1 transactions are exempt.
        let v1 = tx_with(vec![input(10)], LockTime::unlocked(), 1);
        assert!(sequence_locks_satisfied(&v1, &prevouts, Height(100), 0, |_| 0).is_ok());

        // The disable bit turns the lock off.
        let disabled = tx_with(
            vec![input(10 | SEQUENCE_LOCKTIME_DISABLE)],
            LockTime::unlocked(),
            2,
        );
        assert!(sequence_locks_satisfied(&disabled, &prevouts, Height(100), 0, |_| 0).is_ok());
    }

    #[test]
    fn sequence_lock_time_based() {
        tanager_test::init();

        // 4 granules of 512 seconds past the prevout's anchor time.
        let tx = tx_with(
            vec![input(4 | SEQUENCE_LOCKTIME_TYPE)],
            LockTime::unlocked(),
            2,
        );
        let prevouts = [Height(100)];
        let anchor = 1_000_000u32;

        let early = anchor + 4 * 512 - 1;
        let on_time = anchor + 4 * 512;
        assert!(
            sequence_locks_satisfied(&tx, &prevouts, Height(200), early, |_| anchor).is_err()
        );
        assert!(
            sequence_locks_satisfied(&tx, &prevouts, Height(200), on_time, |_| anchor).is_ok()
        );
    }

    #[test]
    fn fee_arithmetic() {
        tanager_test::init();
        let ten = Amount::try_from(10i64).unwrap();
        let three = Amount::try_from(3i64).unwrap();
        assert_eq!(fee(ten, three).unwrap().satoshis(), 7);
        assert!(matches!(
            fee(three, ten),
            Err(TransactionError::InsufficientFunds(7))
        ));
    }
}
