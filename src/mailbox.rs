/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Dual-priority mailbox shared between producers and the owning thread.
//!
//! The mailbox is the only cross-thread mutable state of an actor. Two FIFO
//! queues live behind a single mutex together with the pause and dispatching
//! flags; two condition variables signal message arrival and mailbox
//! drainage. Parcels are popped under the lock but always dropped outside it:
//! a parcel destructor may own handles and send messages back to this very
//! actor.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::message::Message;
use crate::runtime::DispatchHooks;

/// Delivery priority of a message.
///
/// High-priority parcels overtake queued normal-priority parcels and are
/// delivered even while the normal queue is paused for a retry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Priority {
    /// Regular FIFO delivery.
    Normal,
    /// Overtakes the normal queue; clears a retry pause on enqueue.
    High,
}

/// Type-erased unit of work delivered to the dispatcher.
pub(crate) enum Parcel {
    /// A user message, routed to `Actor::process_message`.
    Message(Box<dyn Message>),
    /// Replaces (or clears) the callback slot for one payload type.
    Bind {
        type_id: TypeId,
        channel: Option<Box<dyn Any + Send>>,
    },
}

struct MailboxState {
    normal: VecDeque<Parcel>,
    high: VecDeque<Parcel>,
    paused: bool,
    stop_code: Option<i32>,
}

/// Shared control block: queues, flags and wakeup machinery.
pub(crate) struct MailboxCore {
    name: String,
    state: Mutex<MailboxState>,
    message_waiter: Condvar,
    idle_waiter: Condvar,
    dispatching: AtomicBool,
    detached: AtomicBool,
    hooks: Mutex<Option<Arc<dyn DispatchHooks>>>,
}

impl MailboxCore {
    pub(crate) fn new(name: String) -> Self {
        MailboxCore {
            name,
            state: Mutex::new(MailboxState {
                normal: VecDeque::new(),
                high: VecDeque::new(),
                paused: false,
                stop_code: None,
            }),
            message_waiter: Condvar::new(),
            idle_waiter: Condvar::new(),
            dispatching: AtomicBool::new(true),
            detached: AtomicBool::new(false),
            hooks: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a parcel; wakes the consumer when the target queue was empty.
    ///
    /// A high-priority enqueue clears the retry pause atomically with the
    /// insertion, as observed by the consumer.
    pub(crate) fn post(&self, priority: Priority, parcel: Parcel) {
        let was_empty;
        {
            let mut st = self.state.lock().unwrap();
            let queue = match priority {
                Priority::Normal => &mut st.normal,
                Priority::High => &mut st.high,
            };
            was_empty = queue.is_empty();
            queue.push_back(parcel);
            if priority == Priority::High {
                st.paused = false;
            }
            if was_empty {
                self.message_waiter.notify_one();
            }
        }
        if was_empty {
            if let Some(hooks) = self.hooks() {
                hooks.on_waiting_events();
            }
        }
    }

    /// Consumer-side selection: high head if any, else normal head unless
    /// paused. Returns `None` once stop has been initiated.
    pub(crate) fn try_take(&self) -> Option<(Parcel, Priority)> {
        let mut st = self.state.lock().unwrap();
        if !self.dispatching.load(Ordering::Acquire) {
            return None;
        }
        let taken = if let Some(parcel) = st.high.pop_front() {
            (parcel, Priority::High)
        } else if !st.paused {
            match st.normal.pop_front() {
                Some(parcel) => (parcel, Priority::Normal),
                None => return None,
            }
        } else {
            return None;
        };
        if st.normal.is_empty() && st.high.is_empty() {
            self.idle_waiter.notify_all();
        }
        Some(taken)
    }

    /// Put a retried parcel back at the front of its origin queue and pause
    /// the normal queue until the retry timer clears it.
    pub(crate) fn pause_with(&self, parcel: Parcel, priority: Priority) {
        let mut st = self.state.lock().unwrap();
        match priority {
            Priority::Normal => st.normal.push_front(parcel),
            Priority::High => st.high.push_front(parcel),
        }
        st.paused = true;
    }

    pub(crate) fn clear_pause(&self) {
        self.state.lock().unwrap().paused = false;
    }

    /// True when the selection policy would hand out a parcel right now.
    pub(crate) fn has_deliverable(&self) -> bool {
        let st = self.state.lock().unwrap();
        !st.high.is_empty() || (!st.paused && !st.normal.is_empty())
    }

    /// Consumer-side sleep until a deliverable parcel arrives, the optional
    /// deadline passes, or stop is initiated. Wakes idle waiters whenever the
    /// mailbox is observed empty.
    pub(crate) fn wait_for_work(&self, until: Option<Instant>) {
        let mut st = self.state.lock().unwrap();
        loop {
            if !self.dispatching.load(Ordering::Acquire) {
                return;
            }
            if !st.high.is_empty() || (!st.paused && !st.normal.is_empty()) {
                return;
            }
            if st.normal.is_empty() && st.high.is_empty() {
                self.idle_waiter.notify_all();
            }
            match until {
                None => st = self.message_waiter.wait(st).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    let (guard, _) = self
                        .message_waiter
                        .wait_timeout(st, deadline - now)
                        .unwrap();
                    st = guard;
                    if Instant::now() >= deadline {
                        return;
                    }
                }
            }
        }
    }

    /// Amount of undispatched messages.
    pub(crate) fn pending(&self) -> usize {
        let st = self.state.lock().unwrap();
        st.normal.len() + st.high.len()
    }

    /// Block the caller until the mailbox drains or `max_wait` elapses.
    /// Returns whether the mailbox actually drained.
    pub(crate) fn wait_idle(&self, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        let mut st = self.state.lock().unwrap();
        loop {
            if st.normal.is_empty() && st.high.is_empty() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.idle_waiter.wait_timeout(st, deadline - now).unwrap();
            st = guard;
        }
    }

    /// First stop request wins: stores the exit code, wakes the consumer and
    /// notifies an interleaved foreign loop. Subsequent calls are no-ops.
    pub(crate) fn initiate_stop(&self, code: Option<i32>) {
        {
            let mut st = self.state.lock().unwrap();
            if !self.dispatching.swap(false, Ordering::AcqRel) {
                return;
            }
            if let Some(code) = code {
                st.stop_code = Some(code);
            }
            self.message_waiter.notify_one();
        }
        if let Some(hooks) = self.hooks() {
            hooks.on_stopping();
            hooks.on_waiting_events();
        }
    }

    pub(crate) fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Acquire)
    }

    pub(crate) fn mark_detached(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub(crate) fn set_hooks(&self, hooks: Arc<dyn DispatchHooks>) {
        *self.hooks.lock().unwrap() = Some(hooks);
    }

    pub(crate) fn clear_hooks(&self) {
        self.hooks.lock().unwrap().take();
    }

    pub(crate) fn hooks(&self) -> Option<Arc<dyn DispatchHooks>> {
        self.hooks.lock().unwrap().clone()
    }

    /// Dispatcher epilogue: releases undelivered parcels without delivery,
    /// wakes idle waiters and resolves the exit code (a stored stop code wins
    /// over the `on_stop` return value).
    pub(crate) fn finish(&self, fallback_code: i32) -> i32 {
        let mut discarded: Vec<Parcel>;
        let code;
        {
            let mut st = self.state.lock().unwrap();
            self.dispatching.store(false, Ordering::Release);
            code = st.stop_code.unwrap_or(fallback_code);
            discarded = st.normal.drain(..).collect();
            discarded.extend(st.high.drain(..));
            self.idle_waiter.notify_all();
        }
        // parcel destructors may send messages; run them without the lock
        drop(discarded);
        self.clear_hooks();
        code
    }
}
