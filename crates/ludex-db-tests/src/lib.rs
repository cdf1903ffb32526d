//! Storage-contract tests shared by every driver.
//!
//! Each test is a free function generic over the [`Storage`] impl; driver
//! crates stamp the whole suite onto a concrete setup expression with
//! [`storage_contract_tests!`].

use ludex_db::{DbError, Storage};
use ludex_primitives::{BlockHash, GameStateData, UndoData};

fn hash(n: u8) -> BlockHash {
    BlockHash::new([n; 32])
}

fn state(s: &str) -> GameStateData {
    GameStateData::from(s)
}

fn undo(s: &str) -> UndoData {
    UndoData::from(s.as_bytes())
}

pub fn test_virgin_store<S: Storage>(store: &S) {
    assert!(store.get_current_state().unwrap().is_none());
    assert!(store.get_undo(&hash(1)).unwrap().is_none());
}

pub fn test_current_state_roundtrip<S: Storage>(store: &S) {
    store.begin_transaction().unwrap();
    store.set_current_state(hash(1), &state("one")).unwrap();
    store.commit_transaction().unwrap();

    let (h, s) = store.get_current_state().unwrap().unwrap();
    assert_eq!(h, hash(1));
    assert_eq!(s, state("one"));

    // Overwrite wins.
    store.begin_transaction().unwrap();
    store.set_current_state(hash(2), &state("two")).unwrap();
    store.commit_transaction().unwrap();

    let (h, s) = store.get_current_state().unwrap().unwrap();
    assert_eq!(h, hash(2));
    assert_eq!(s, state("two"));
}

pub fn test_writes_require_transaction<S: Storage>(store: &S) {
    assert!(matches!(
        store.set_current_state(hash(1), &state("x")),
        Err(DbError::NoTransaction)
    ));
    assert!(matches!(
        store.store_undo(hash(1), 1, &undo("x")),
        Err(DbError::NoTransaction)
    ));
    assert!(matches!(
        store.delete_undo(&hash(1)),
        Err(DbError::NoTransaction)
    ));
    assert!(matches!(
        store.commit_transaction(),
        Err(DbError::NoTransaction)
    ));
    assert!(matches!(
        store.rollback_transaction(),
        Err(DbError::NoTransaction)
    ));
}

pub fn test_one_transaction_at_a_time<S: Storage>(store: &S) {
    store.begin_transaction().unwrap();
    assert!(matches!(
        store.begin_transaction(),
        Err(DbError::TransactionAlreadyOpen)
    ));
    store.rollback_transaction().unwrap();
    store.begin_transaction().unwrap();
    store.commit_transaction().unwrap();
}

pub fn test_reads_observe_own_writes<S: Storage>(store: &S) {
    store.begin_transaction().unwrap();
    store.set_current_state(hash(1), &state("staged")).unwrap();
    store.store_undo(hash(1), 11, &undo("u1")).unwrap();

    let (h, s) = store.get_current_state().unwrap().unwrap();
    assert_eq!(h, hash(1));
    assert_eq!(s, state("staged"));
    assert_eq!(store.get_undo(&hash(1)).unwrap().unwrap(), undo("u1"));

    store.delete_undo(&hash(1)).unwrap();
    assert!(store.get_undo(&hash(1)).unwrap().is_none());

    store.rollback_transaction().unwrap();
}

pub fn test_rollback_is_atomic<S: Storage>(store: &S) {
    store.begin_transaction().unwrap();
    store.set_current_state(hash(1), &state("one")).unwrap();
    store.store_undo(hash(1), 11, &undo("u1")).unwrap();
    store.commit_transaction().unwrap();

    store.begin_transaction().unwrap();
    store.set_current_state(hash(2), &state("two")).unwrap();
    store.store_undo(hash(2), 12, &undo("u2")).unwrap();
    store.delete_undo(&hash(1)).unwrap();
    store.rollback_transaction().unwrap();

    let (h, s) = store.get_current_state().unwrap().unwrap();
    assert_eq!(h, hash(1));
    assert_eq!(s, state("one"));
    assert_eq!(store.get_undo(&hash(1)).unwrap().unwrap(), undo("u1"));
    assert!(store.get_undo(&hash(2)).unwrap().is_none());
}

pub fn test_delete_undo_idempotent<S: Storage>(store: &S) {
    store.begin_transaction().unwrap();
    store.store_undo(hash(1), 11, &undo("u1")).unwrap();
    store.commit_transaction().unwrap();

    store.begin_transaction().unwrap();
    store.delete_undo(&hash(1)).unwrap();
    store.delete_undo(&hash(1)).unwrap();
    store.delete_undo(&hash(9)).unwrap();
    store.commit_transaction().unwrap();

    assert!(store.get_undo(&hash(1)).unwrap().is_none());
}

pub fn test_store_undo_replaces<S: Storage>(store: &S) {
    store.begin_transaction().unwrap();
    store.store_undo(hash(1), 11, &undo("old")).unwrap();
    store.commit_transaction().unwrap();

    store.begin_transaction().unwrap();
    store.store_undo(hash(1), 13, &undo("new")).unwrap();
    store.commit_transaction().unwrap();

    assert_eq!(store.get_undo(&hash(1)).unwrap().unwrap(), undo("new"));

    // The entry now lives at height 13; pruning through 12 must keep it.
    store.begin_transaction().unwrap();
    store.prune_undo_up_to(12).unwrap();
    store.commit_transaction().unwrap();
    assert!(store.get_undo(&hash(1)).unwrap().is_some());
}

pub fn test_prune_undo_up_to<S: Storage>(store: &S) {
    store.begin_transaction().unwrap();
    for n in 1..=5u8 {
        store
            .store_undo(hash(n), 10 + n as u32, &undo(&format!("u{n}")))
            .unwrap();
    }
    store.commit_transaction().unwrap();

    store.begin_transaction().unwrap();
    store.prune_undo_up_to(13).unwrap();
    store.commit_transaction().unwrap();

    for n in 1..=3u8 {
        assert!(store.get_undo(&hash(n)).unwrap().is_none());
    }
    for n in 4..=5u8 {
        assert!(store.get_undo(&hash(n)).unwrap().is_some());
    }
}

pub fn test_prune_leaves_current_untouched<S: Storage>(store: &S) {
    store.begin_transaction().unwrap();
    store.set_current_state(hash(5), &state("tip")).unwrap();
    store.store_undo(hash(5), 15, &undo("u5")).unwrap();
    store.commit_transaction().unwrap();

    store.begin_transaction().unwrap();
    store.prune_undo_up_to(14).unwrap();
    store.commit_transaction().unwrap();

    let (h, s) = store.get_current_state().unwrap().unwrap();
    assert_eq!(h, hash(5));
    assert_eq!(s, state("tip"));
    assert!(store.get_undo(&hash(5)).unwrap().is_some());
}

pub fn test_clear_resets_to_virgin<S: Storage>(store: &S) {
    store.begin_transaction().unwrap();
    store.set_current_state(hash(1), &state("one")).unwrap();
    store.store_undo(hash(1), 11, &undo("u1")).unwrap();
    store.commit_transaction().unwrap();

    store.begin_transaction().unwrap();
    store.clear().unwrap();
    store.commit_transaction().unwrap();

    assert!(store.get_current_state().unwrap().is_none());
    assert!(store.get_undo(&hash(1)).unwrap().is_none());
}

/// Stamps the whole contract suite onto a driver.  The argument is an
/// expression producing a fresh store; it is re-evaluated per test.
#[macro_export]
macro_rules! storage_contract_tests {
    ($setup:expr) => {
        #[test]
        fn test_contract_virgin_store() {
            $crate::test_virgin_store(&$setup);
        }

        #[test]
        fn test_contract_current_state_roundtrip() {
            $crate::test_current_state_roundtrip(&$setup);
        }

        #[test]
        fn test_contract_writes_require_transaction() {
            $crate::test_writes_require_transaction(&$setup);
        }

        #[test]
        fn test_contract_one_transaction_at_a_time() {
            $crate::test_one_transaction_at_a_time(&$setup);
        }

        #[test]
        fn test_contract_reads_observe_own_writes() {
            $crate::test_reads_observe_own_writes(&$setup);
        }

        #[test]
        fn test_contract_rollback_is_atomic() {
            $crate::test_rollback_is_atomic(&$setup);
        }

        #[test]
        fn test_contract_delete_undo_idempotent() {
            $crate::test_delete_undo_idempotent(&$setup);
        }

        #[test]
        fn test_contract_store_undo_replaces() {
            $crate::test_store_undo_replaces(&$setup);
        }

        #[test]
        fn test_contract_prune_undo_up_to() {
            $crate::test_prune_undo_up_to(&$setup);
        }

        #[test]
        fn test_contract_prune_leaves_current_untouched() {
            $crate::test_prune_leaves_current_untouched(&$setup);
        }

        #[test]
        fn test_contract_clear_resets_to_virgin() {
            $crate::test_clear_resets_to_virgin(&$setup);
        }
    };
}
