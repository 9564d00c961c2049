//! Integration tests for RID allocation against shared stores.
//!
//! Each thread gets its own `Directory` handle over one store, the way
//! concurrent callers would. Every allocation must be unique.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use common::{config, provisioned, user};
use dirsam_directory::{
    Directory, DirectoryError, DirectoryStore, MemoryStore, Modification, SqliteStore,
};
use dirsam_ridalloc::FIRST_ALLOCATABLE_RID;

const THREADS: usize = 4;
const PER_THREAD: usize = 40;

#[test]
fn test_concurrent_allocation_on_shared_memory_store() {
    let mut cfg = config();
    cfg.rid_pool_size = 25;
    let store = Arc::new(MemoryStore::new());
    provisioned(Arc::clone(&store), cfg.clone());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            let cfg = cfg.clone();
            thread::spawn(move || {
                let dir = Directory::new(store, cfg).unwrap();
                (0..PER_THREAD)
                    .map(|_| dir.allocate_rid().unwrap().value())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for handle in handles {
        for rid in handle.join().unwrap() {
            assert!(seen.insert(rid), "RID {rid} handed out twice");
        }
    }

    // Refill keeps the sequence contiguous across pools.
    let total = (THREADS * PER_THREAD) as u32;
    let expected: BTreeSet<u32> = (FIRST_ALLOCATABLE_RID..FIRST_ALLOCATABLE_RID + total).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_concurrent_user_creation_gets_unique_sids() {
    let store = Arc::new(MemoryStore::new());
    provisioned(Arc::clone(&store), config());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let dir = Directory::new(store, config()).unwrap();
                (0..5)
                    .map(|i| {
                        let created = dir.new_user(user(&format!("user{t}x{i}"))).unwrap();
                        created.sid().unwrap().to_string()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let sids: BTreeSet<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(sids.len(), THREADS * 5);
}

#[test]
fn test_concurrent_allocation_on_shared_sqlite_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("sam.db");
    provisioned(SqliteStore::open(&path).unwrap(), config());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let dir = Directory::new(SqliteStore::open(&path).unwrap(), config()).unwrap();
                let mut rids = Vec::new();
                while rids.len() < 10 {
                    match dir.allocate_rid() {
                        Ok(rid) => rids.push(rid.value()),
                        Err(err) if err.is_retryable() => thread::yield_now(),
                        Err(err) => panic!("allocation failed: {err}"),
                    }
                }
                rids
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for handle in handles {
        for rid in handle.join().unwrap() {
            assert!(seen.insert(rid), "RID {rid} handed out twice");
        }
    }
    assert_eq!(seen.len(), THREADS * 10);
}

#[test]
fn test_exhausted_pool_fails_creation_cleanly() {
    let mut cfg = config();
    cfg.rid_pool_size = 3;
    cfg.rid_refill = false;
    let dir = provisioned(MemoryStore::new(), cfg);

    for name in ["a1", "a2", "a3"] {
        dir.new_user(user(name)).unwrap();
    }
    let err = dir.new_user(user("a4")).unwrap_err();
    assert!(matches!(err, DirectoryError::PoolExhausted(_)), "unexpected: {err}");
    assert!(common::find_accounts(&dir, "a4").is_empty());

    // Contacts need no RID and still succeed.
    dir.new_contact(dirsam_directory::NewContact {
        full_name: Some("Outside Vendor".to_string()),
        ..Default::default()
    })
    .unwrap();
}

#[test]
fn test_new_rid_set_after_refill_disabled_exhaustion() {
    let mut cfg = config();
    cfg.rid_pool_size = 2;
    cfg.rid_refill = false;
    let dir = provisioned(MemoryStore::new(), cfg);

    assert_eq!(dir.free_rid_bounds().unwrap(), (FIRST_ALLOCATABLE_RID, FIRST_ALLOCATABLE_RID + 1));
    dir.allocate_rid().unwrap();
    dir.allocate_rid().unwrap();
    assert!(matches!(dir.next_free_rid(), Err(DirectoryError::PoolExhausted(_))));

    let state = dir.rid_pool_state().unwrap();
    assert!(!state.has_pending_pool());
    assert_eq!(state.remaining_in_current_pool(), 0);
}

#[test]
fn test_allocation_continues_when_rid_manager_is_drained() {
    let mut cfg = config();
    cfg.rid_pool_size = 4;
    let dir = provisioned(MemoryStore::new(), cfg);

    // lo above hi: the domain has nothing left to carve.
    let drained = (1000_u64 << 32) | 1001;
    dir.store()
        .modify(
            &Modification::new(dir.well_known().rid_manager.clone())
                .replace("rIDAvailablePool", [drained.to_string()]),
        )
        .unwrap();

    for expected in FIRST_ALLOCATABLE_RID..FIRST_ALLOCATABLE_RID + 4 {
        assert_eq!(dir.allocate_rid().unwrap().value(), expected);
    }
    let state = dir.rid_pool_state().unwrap();
    assert_eq!(state.remaining_in_current_pool(), 0);
    assert!(!state.has_pending_pool());

    // Only now is the server really out of RIDs.
    assert!(matches!(dir.allocate_rid(), Err(DirectoryError::PoolExhausted(_))));
}
