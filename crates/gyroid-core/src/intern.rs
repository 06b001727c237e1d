//! Process-wide hash-consing table.
//!
//! The table maps structural keys to weak back-references, so it observes
//! records without owning them. Lookup-or-insert runs under the shard lock:
//! two threads interning the same key both come away holding the same
//! record. Removal happens from the handle destructor on last release; a
//! lost removal race leaves at worst a dead weak entry, which the next
//! insert with the same key replaces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;

use crate::node::{NodeKey, TreeData};

static TABLE: LazyLock<DashMap<NodeKey, Weak<TreeData>, FxBuildHasher>> =
    LazyLock::new(|| DashMap::with_hasher(FxBuildHasher::default()));

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(0);

/// Allocates an identity for a free variable. Never reused.
pub(crate) fn fresh_var_id() -> u64 {
    NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed)
}

/// Returns the canonical record for `key`, building one if necessary.
///
/// `build` runs at most once, and only when no live record exists. The
/// upgrade and the insert happen under the same shard lock, which makes the
/// lookup-or-insert pair linearisable.
pub(crate) fn intern(key: NodeKey, build: impl FnOnce() -> TreeData) -> Arc<TreeData> {
    match TABLE.entry(key) {
        Entry::Occupied(mut occupied) => {
            if let Some(existing) = occupied.get().upgrade() {
                return existing;
            }
            // The previous record died without cleaning up its entry.
            let fresh = Arc::new(build());
            *occupied.get_mut() = Arc::downgrade(&fresh);
            fresh
        }
        Entry::Vacant(vacant) => {
            let fresh = Arc::new(build());
            vacant.insert(Arc::downgrade(&fresh));
            fresh
        }
    }
}

/// Detaches a record that is about to be destroyed.
///
/// The caller holds the only remaining strong reference. Both conditions are
/// re-checked under the shard lock: a concurrent `intern` may have revived
/// the record, or already replaced the entry with a different one.
pub(crate) fn forget(data: &Arc<TreeData>) {
    if let Some(key) = NodeKey::from_data(data) {
        TABLE.remove_if(&key, |_, weak| {
            std::ptr::eq(weak.as_ptr(), Arc::as_ptr(data)) && Arc::strong_count(data) == 1
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TreeOp;

    #[test]
    fn test_intern_deduplicates() {
        let key = NodeKey::Const(0x7FC0_1234);
        let a = intern(key, || TreeData::new(TreeOp::Const(f32::from_bits(0x7FC0_1234))));
        let b = intern(key, || unreachable!("must reuse the live record"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(Arc::strong_count(&a), 2);
    }

    #[test]
    fn test_fresh_var_ids_are_distinct() {
        let a = fresh_var_id();
        let b = fresh_var_id();
        assert_ne!(a, b);
    }
}
