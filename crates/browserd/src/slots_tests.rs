// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;
use std::sync::Arc;

use super::SlotPool;

#[test]
fn acquire_is_lowest_index_first() -> anyhow::Result<()> {
    let pool = SlotPool::new(3, 101, 6080, 5080);

    let a = pool.acquire().ok_or_else(|| anyhow::anyhow!("pool empty"))?;
    let b = pool.acquire().ok_or_else(|| anyhow::anyhow!("pool empty"))?;
    assert_eq!(a.index, 0);
    assert_eq!(b.index, 1);
    assert_eq!(a.display_num, 101);
    assert_eq!(a.vnc_port, 6080);
    assert_eq!(a.web_port, 5080);
    assert_eq!(b.display_num, 102);

    // Releasing the lower slot makes it the next grant again.
    pool.release(&a);
    let c = pool.acquire().ok_or_else(|| anyhow::anyhow!("pool empty"))?;
    assert_eq!(c.index, 0);
    Ok(())
}

#[test]
fn exhausted_pool_returns_none() -> anyhow::Result<()> {
    let pool = SlotPool::new(2, 101, 6080, 5080);
    let _a = pool.acquire().ok_or_else(|| anyhow::anyhow!("pool empty"))?;
    let _b = pool.acquire().ok_or_else(|| anyhow::anyhow!("pool empty"))?;
    assert!(pool.acquire().is_none());
    assert_eq!(pool.free_count(), 0);
    Ok(())
}

#[test]
fn double_release_is_noop() -> anyhow::Result<()> {
    let pool = SlotPool::new(1, 101, 6080, 5080);
    let a = pool.acquire().ok_or_else(|| anyhow::anyhow!("pool empty"))?;
    pool.release(&a);
    pool.release(&a);
    assert_eq!(pool.free_count(), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_acquires_grant_distinct_slots() -> anyhow::Result<()> {
    let pool = Arc::new(SlotPool::new(10, 101, 6080, 5080));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move { pool.acquire() }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let slot = handle.await?.ok_or_else(|| anyhow::anyhow!("pool exhausted early"))?;
        assert!(seen.insert(slot.index), "slot {} granted twice", slot.index);
    }
    assert_eq!(seen.len(), 10);
    assert!(pool.acquire().is_none());
    Ok(())
}

proptest::proptest! {
    // Any interleaving of acquires and releases keeps the used set a subset
    // of the pool with no index granted to two holders at once.
    #[test]
    fn pool_never_double_grants(ops in proptest::collection::vec(0u8..2, 1..64)) {
        let pool = SlotPool::new(4, 101, 6080, 5080);
        let mut held: Vec<super::Slot> = Vec::new();

        for op in ops {
            if op == 0 {
                if let Some(slot) = pool.acquire() {
                    proptest::prop_assert!(
                        held.iter().all(|h| h.index != slot.index),
                        "index {} already held", slot.index
                    );
                    proptest::prop_assert!(slot.index < 4);
                    held.push(slot);
                }
            } else if let Some(slot) = held.pop() {
                pool.release(&slot);
            }
            proptest::prop_assert_eq!(pool.free_count(), 4 - held.len());
        }
    }
}
