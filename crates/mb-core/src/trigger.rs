//! Completion barrier tying the end of one fetch generation to the start of
//! the next.
//!
//! Not a wait-group: a plain wait-group fires as soon as the countdown hits
//! zero, which races against the caller still issuing `add()`s for the same
//! generation. [`Trigger`] separates "all expected tasks have been counted"
//! (`arm`) from "the count reached zero" (`done`), so the callback only ever
//! fires after both have happened — including the zero-task case where
//! `arm()` runs before any `done()`.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::CoreError;

struct State {
    countdown: i64,
    armed: bool,
    fired: bool,
    callback: Option<Box<dyn FnOnce() + Send>>,
}

/// A one-shot completion barrier. Cheap to clone; clones share the same
/// underlying state.
#[derive(Clone)]
pub struct Trigger {
    state: Arc<Mutex<State>>,
}

impl Trigger {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(State {
                countdown: 0,
                armed: false,
                fired: false,
                callback: Some(Box::new(callback)),
            })),
        }
    }

    /// Register one more task. Must be called before the task is spawned,
    /// and strictly before its paired `done()`.
    pub fn add(&self) {
        let mut state = self.state.lock();
        state.countdown += 1;
    }

    /// Mark one task complete. Fires the callback if the trigger is armed
    /// and this was the last outstanding task.
    ///
    /// Panics with [`CoreError::TriggerUnbalanced`] if called more times than
    /// `add()` — a programmer error (§7), not a reportable failure.
    pub fn done(&self) {
        let callback = {
            let mut state = self.state.lock();
            state.countdown -= 1;
            if state.countdown < 0 {
                panic!("{}", CoreError::TriggerUnbalanced);
            }
            self.maybe_fire(&mut state)
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Returns a guard that calls `done()` when dropped, including on
    /// unwind. Use this around a fetch task's body instead of a bare
    /// `done()` call so a panicking `DataSource` can't leave the trigger
    /// permanently unbalanced.
    pub fn done_guard(&self) -> DoneGuard {
        DoneGuard(self.clone())
    }

    /// Mark the generation fully counted. Must be called exactly once, after
    /// the last `add()` of the generation. Fires immediately if the
    /// countdown is already zero (the zero-task edge case).
    ///
    /// Panics with [`CoreError::TriggerAlreadyArmed`] if called more than
    /// once on the same trigger.
    pub fn arm(&self) {
        let callback = {
            let mut state = self.state.lock();
            if state.armed {
                panic!("{}", CoreError::TriggerAlreadyArmed);
            }
            state.armed = true;
            self.maybe_fire(&mut state)
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Takes the callback out of `state` if this call is the one that should
    /// fire it. Must be called with the lock held; the callback itself runs
    /// after the lock is released to avoid calling user code under the mutex.
    fn maybe_fire(&self, state: &mut State) -> Option<Box<dyn FnOnce() + Send>> {
        if state.countdown == 0 && state.armed && !state.fired {
            state.fired = true;
            state.callback.take()
        } else {
            None
        }
    }
}

/// RAII counterpart to a single `add()`. Dropping it — whether the guarded
/// future finishes normally or panics — calls `done()` exactly once.
pub struct DoneGuard(Trigger);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fires_once_countdown_reaches_zero_after_arm() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let trigger = Trigger::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        trigger.add();
        trigger.add();
        trigger.done();
        assert_eq!(fired.load(Ordering::SeqCst), 0, "should not fire before arm");
        trigger.arm();
        assert_eq!(fired.load(Ordering::SeqCst), 0, "one task still outstanding");
        trigger.done();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fires_immediately_on_arm_when_zero_tasks() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let trigger = Trigger::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        trigger.arm();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fires_at_most_once_under_racing_done_and_arm() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let trigger = Trigger::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        trigger.add();
        trigger.add();

        let t1 = trigger.clone();
        let t2 = trigger.clone();
        let h1 = std::thread::spawn(move || t1.done());
        let h2 = std::thread::spawn(move || t2.done());
        trigger.arm();
        h1.join().unwrap();
        h2.join().unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "done() called without a matching add()")]
    fn done_without_matching_add_is_fatal() {
        let trigger = Trigger::new(|| {});
        trigger.done();
    }

    #[test]
    #[should_panic(expected = "armed more than once")]
    fn arming_twice_is_fatal() {
        let trigger = Trigger::new(|| {});
        trigger.arm();
        trigger.arm();
    }

    #[test]
    fn done_guard_fires_done_on_drop() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let trigger = Trigger::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        trigger.add();
        {
            let _guard = trigger.done_guard();
        }
        trigger.arm();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn done_guard_fires_done_on_panic_unwind() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let trigger = Trigger::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        trigger.add();
        let guarded = trigger.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = guarded.done_guard();
            panic!("simulated fetch failure");
        }));
        assert!(result.is_err());
        trigger.arm();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
