use std::convert::TryFrom;

use proptest::prelude::*;

use crate::amount::Amount;
use crate::transparent::{CoinbaseData, Input, OutPoint, Output, Script};

use super::*;

fn coinbase_tx() -> Transaction {
    Transaction::new(
        1,
        vec![Input::Coinbase {
            data: CoinbaseData::new(vec![0x03, 0x5b, 0x7a, 0x03]),
            sequence: 0xffff_ffff,
        }],
        vec![Output {
            value: Amount::try_from(5_000_000_000i64).expect("in range"),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    )
}

#[test]
fn coinbase_detection() {
    let coinbase = coinbase_tx();
    assert!(coinbase.is_coinbase());
    assert!(coinbase.contains_coinbase_input());

    let spend = Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                txid: Txid([9u8; 32]),
                index: 0,
            },
            unlock_script: Script(vec![]),
            sequence: 0,
        }],
        vec![Output {
            value: Amount::try_from(1i64).unwrap(),
            lock_script: Script(vec![]),
        }],
        LockTime::unlocked(),
    );
    assert!(!spend.is_coinbase());
    assert!(!spend.contains_coinbase_input());
}

#[test]
fn lock_time_threshold() {
    assert_eq!(
        LockTime::from_raw(499_999_999),
        LockTime::Height(crate::block::Height(499_999_999))
    );
    assert_eq!(LockTime::from_raw(500_000_000), LockTime::Time(500_000_000));
}

proptest! {
    /// The base length accessor must agree with the actual base encoding.
    #[test]
    fn base_len_matches_encoding(
        script in proptest::collection::vec(any::<u8>(), 0..80),
        sequence in any::<u32>(),
        lock_time in any::<u32>(),
    ) {
        tanager_test::init();

        let tx = Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint { txid: Txid([3u8; 32]), index: 0 },
                unlock_script: Script(script),
                sequence,
            }],
            vec![Output {
                value: Amount::try_from(123i64).unwrap(),
                lock_script: Script(vec![0xa9]),
            }],
            LockTime::from_raw(lock_time),
        );

        let mut bytes = Vec::new();
        tx.encode_base(&mut bytes)?;
        prop_assert_eq!(bytes.len(), tx.base_len());
    }
}
