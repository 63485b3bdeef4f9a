// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    collections::VecDeque,
    task::{
        Context,
        Waker,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Set of tasks blocked on a condition of a connection record. Tasks register themselves while polling and are woken
/// when the owner of the condition signals a change. Woken tasks re-check the condition when they are polled again.
#[derive(Default)]
pub struct ConditionVariable {
    waiters: VecDeque<Waker>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ConditionVariable {
    /// Registers the task polling with `context` as a waiter. A task that is already waiting is not added twice.
    pub fn wait(&mut self, context: &Context) {
        let waker: &Waker = context.waker();
        if !self.waiters.iter().any(|w| w.will_wake(waker)) {
            self.waiters.push_back(waker.clone());
        }
    }

    /// Wake the next waiting task.
    pub fn signal(&mut self) {
        if let Some(waiter) = self.waiters.pop_front() {
            waiter.wake();
        }
    }

    /// Wake all waiting tasks.
    pub fn broadcast(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            waiter.wake();
        }
    }

    /// Number of tasks currently waiting.
    pub fn num_waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Forget all waiters without waking them.
    pub fn cancel(&mut self) {
        self.waiters.clear();
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
