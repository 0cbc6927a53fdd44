//! Recursion/stack-depth guarding.
//!
//! Grounded on `ouros`'s resource-limit module: a cheap counter the
//! evaluator and VM both bump on entry and check against a ceiling, turning
//! a Rust stack overflow (which aborts the process) into a recoverable
//! condition.

use crate::condition::{ConditionType, RunError, RunResult};

/// Default recursion ceiling for `meaning`/`vm-run` re-entrancy. Generous
/// enough for realistic programs, far below the point where the host Rust
/// stack itself would be in danger.
pub const DEFAULT_MAX_DEPTH: usize = 10_000;

/// A guard that increments on construction and decrements on drop, so a
/// `?`-propagated error still restores the counter (RAII, matching
/// `ouros::resource`'s guard shape).
#[derive(Debug)]
pub struct DepthGuard<'a> {
    depth: &'a std::cell::Cell<usize>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

/// Tracks nested evaluator/VM re-entry depth for one thread of control.
#[derive(Debug, Default)]
pub struct ResourceLimits {
    depth: std::cell::Cell<usize>,
    max_depth: usize,
}

impl ResourceLimits {
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        Self {
            depth: std::cell::Cell::new(0),
            max_depth,
        }
    }

    /// Enters one more level of recursion, returning a guard that restores
    /// the counter when dropped. Errors if the ceiling is exceeded.
    pub fn enter(&self) -> RunResult<DepthGuard<'_>> {
        let next = self.depth.get() + 1;
        if next > self.max_depth {
            return Err(RunError::new(
                ConditionType::EvaluationError,
                format!("recursion depth exceeded ({} levels)", self.max_depth),
            ));
        }
        self.depth.set(next);
        Ok(DepthGuard { depth: &self.depth })
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_depth_on_drop() {
        let limits = ResourceLimits::new(4);
        {
            let _g = limits.enter().unwrap();
            assert_eq!(limits.current_depth(), 1);
        }
        assert_eq!(limits.current_depth(), 0);
    }

    #[test]
    fn exceeding_ceiling_errors_without_panicking() {
        let limits = ResourceLimits::new(2);
        let _a = limits.enter().unwrap();
        let _b = limits.enter().unwrap();
        assert!(limits.enter().is_err());
    }
}
