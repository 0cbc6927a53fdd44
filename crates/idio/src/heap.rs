//! A minimal allocation/rooting stand-in for Idio's garbage collector.
//!
//! The real Idio GC (allocation, rooting, write barriers, finalisers) is an
//! out-of-scope external collaborator: the evaluator/compiler/VM only need
//! *some* way to share and mutate heap objects. `Gc<T>` is that minimum --
//! reference-counted, interior-mutable storage. It does not collect cycles;
//! see `DESIGN.md` for why that is an accepted limitation rather than a bug.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;

/// A heap-allocated, shared, mutable Idio value.
///
/// Every heap variant of [`crate::value::Value`] (pairs, arrays, hashes,
/// closures, struct instances, continuations, ...) is a `Gc<T>` of the
/// matching Rust type.
#[derive(Debug)]
pub struct Gc<T>(Rc<RefCell<T>>);

impl<T> Gc<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    /// Identity equality: same allocation, i.e. Idio's `eq?` for heap values.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn as_ptr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    #[must_use]
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

/// Heap-wide bookkeeping: a live allocation counter per type name, used by
/// [`HeapStats`] snapshots. Allocation itself happens through `Gc::new`
/// directly (there is no single arena to route through once the GC
/// contract is out of scope), so the tracker is opt-in: call
/// [`HeapTracker::record`] at each `Gc::new` call site that wants to be
/// visible in a snapshot.
#[derive(Debug, Default)]
pub struct HeapTracker {
    live_by_type: RefCell<BTreeMap<&'static str, usize>>,
    total_allocations: RefCell<usize>,
}

impl HeapTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, type_name: &'static str) {
        *self.live_by_type.borrow_mut().entry(type_name).or_insert(0) += 1;
        *self.total_allocations.borrow_mut() += 1;
    }

    pub fn release(&self, type_name: &'static str) {
        if let Some(count) = self.live_by_type.borrow_mut().get_mut(type_name) {
            *count = count.saturating_sub(1);
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> HeapStats {
        HeapStats {
            objects_by_type: self.live_by_type.borrow().clone(),
            total_allocations: *self.total_allocations.borrow(),
        }
    }
}

/// Snapshot of heap allocation activity at a point in time.
///
/// Mirrors the shape of the teacher crate's `HeapStats`/`HeapDiff` pair,
/// used the same way here: comparing two snapshots around a test body shows
/// what it allocated.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HeapStats {
    pub objects_by_type: BTreeMap<&'static str, usize>,
    pub total_allocations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HeapDiff {
    pub objects_by_type_delta: BTreeMap<&'static str, isize>,
    pub total_allocations_delta: isize,
}

impl HeapStats {
    #[must_use]
    pub fn diff(&self, other: &Self) -> HeapDiff {
        let mut objects_by_type_delta = BTreeMap::new();
        for key in self.objects_by_type.keys().chain(other.objects_by_type.keys()) {
            let before = *self.objects_by_type.get(key).unwrap_or(&0) as isize;
            let after = *other.objects_by_type.get(key).unwrap_or(&0) as isize;
            objects_by_type_delta.insert(*key, after - before);
        }
        HeapDiff {
            objects_by_type_delta,
            total_allocations_delta: other.total_allocations as isize - self.total_allocations as isize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gc_ptr_eq_is_identity() {
        let a = Gc::new(42);
        let b = a.clone();
        let c = Gc::new(42);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn tracker_diff_reports_growth() {
        let tracker = HeapTracker::new();
        let before = tracker.snapshot();
        tracker.record("Pair");
        tracker.record("Pair");
        tracker.record("Array");
        let after = tracker.snapshot();
        let diff = before.diff(&after);
        assert_eq!(diff.objects_by_type_delta[&"Pair"], 2);
        assert_eq!(diff.objects_by_type_delta[&"Array"], 1);
        assert_eq!(diff.total_allocations_delta, 3);
    }
}
