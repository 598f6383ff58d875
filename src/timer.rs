/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Payload-keyed timers owned by the dispatcher thread.
//!
//! A timer's identity is its payload value: at most one live timer exists per
//! (payload type, payload value) pair in a given actor. The pending timers
//! are ordered by `(deadline, sequence)`; the sequence number breaks deadline
//! ties so unrelated timers with identical deadlines coexist. Strong records
//! live in the ordered queue, the per-payload table holds weak references.
//!
//! Everything here is single-threaded state of the owning thread; the
//! containing context is `!Send`, so cross-thread timer manipulation does not
//! compile.

use std::any::Any;
use std::borrow::Borrow;
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Repetition mode of a timer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerCycle {
    /// Re-arms itself after every firing, keeping a regular phase.
    Periodic,
    /// Fires once and is removed.
    OneShot,
}

/// Value usable as a timer identity.
///
/// Blanket implemented for every `Ord + Clone + Send + 'static` type; the
/// ordering requirement carries over from the keyed timer table. Two timers
/// are the same timer iff their payloads are of the same type and compare
/// equal.
pub trait TimerPayload: Any + Send {
    /// For handing the payload to a firing handler.
    fn as_any(&self) -> &dyn Any;

    /// Owned copy, used as the table key.
    fn boxed_clone(&self) -> Box<dyn TimerPayload>;

    /// Value comparison against another payload of the same type.
    fn payload_cmp(&self, other: &dyn TimerPayload) -> Ordering;
}

impl<T: Any + Send + Clone + Ord> TimerPayload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn boxed_clone(&self) -> Box<dyn TimerPayload> {
        Box::new(self.clone())
    }

    fn payload_cmp(&self, other: &dyn TimerPayload) -> Ordering {
        match other.as_any().downcast_ref::<T>() {
            Some(other) => self.cmp(other),
            None => self.as_any().type_id().cmp(&other.as_any().type_id()),
        }
    }
}

// Payloads of distinct types are grouped by TypeId, then value-ordered.
impl PartialEq for dyn TimerPayload {
    fn eq(&self, other: &dyn TimerPayload) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for dyn TimerPayload {}

impl PartialOrd for dyn TimerPayload {
    fn partial_cmp(&self, other: &dyn TimerPayload) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for dyn TimerPayload {
    fn cmp(&self, other: &dyn TimerPayload) -> Ordering {
        self.as_any()
            .type_id()
            .cmp(&other.as_any().type_id())
            .then_with(|| self.payload_cmp(other))
    }
}

/// Table key owning a copy of the payload.
pub(crate) struct PayloadKey(Box<dyn TimerPayload>);

impl Borrow<dyn TimerPayload> for PayloadKey {
    fn borrow(&self) -> &(dyn TimerPayload + 'static) {
        self.0.as_ref()
    }
}

impl PartialEq for PayloadKey {
    fn eq(&self, other: &PayloadKey) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}

impl Eq for PayloadKey {}

impl PartialOrd for PayloadKey {
    fn partial_cmp(&self, other: &PayloadKey) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PayloadKey {
    fn cmp(&self, other: &PayloadKey) -> Ordering {
        self.0.as_ref().cmp(other.0.as_ref())
    }
}

/// What happens when a timer elapses.
pub(crate) enum TimerEvent {
    /// Route the payload to `Actor::process_timer`.
    Dispatch,
    /// Invoke a stored callback (a bound channel, or runtime-internal work).
    Callback(Box<dyn Fn(&dyn Any)>),
}

/// One pending timer. Scheduling fields are `Cell`s: records are shared
/// between the queue, the table and an in-flight firing frame via `Rc`.
pub(crate) struct TimerRecord {
    seq: u64,
    payload: Box<dyn TimerPayload>,
    event: TimerEvent,
    lapse: Cell<Duration>,
    cycle: Cell<TimerCycle>,
    deadline: Cell<Instant>,
    shoot: Cell<bool>,
}

impl TimerRecord {
    pub(crate) fn payload_any(&self) -> &dyn Any {
        self.payload.as_any()
    }

    pub(crate) fn event(&self) -> &TimerEvent {
        &self.event
    }

    /// Set at firing entry; cleared when the handler stops, resets or
    /// restarts this timer, which suppresses the post-firing bookkeeping.
    pub(crate) fn set_shoot(&self, value: bool) {
        self.shoot.set(value)
    }

    pub(crate) fn shoot(&self) -> bool {
        self.shoot.get()
    }
}

struct QueueEntry {
    deadline: Instant,
    seq: u64,
    rec: Rc<TimerRecord>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &QueueEntry) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &QueueEntry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &QueueEntry) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// The per-actor timer set.
pub(crate) struct TimerSet {
    queue: BTreeSet<QueueEntry>,
    table: BTreeMap<PayloadKey, Weak<TimerRecord>>,
    next_seq: u64,
}

impl TimerSet {
    pub(crate) fn new() -> Self {
        TimerSet {
            queue: BTreeSet::new(),
            table: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Install a timer, or reprogram the live timer with the same payload
    /// value. Reprogramming replaces lapse, cycle and event; the previous
    /// record is unlinked with its `shoot` flag cleared so an in-flight
    /// firing will not reschedule it.
    pub(crate) fn start(
        &mut self,
        payload: Box<dyn TimerPayload>,
        lapse: Duration,
        event: TimerEvent,
        cycle: TimerCycle,
    ) {
        self.stop(payload.as_ref());
        let seq = self.next_seq;
        self.next_seq += 1;
        let rec = Rc::new(TimerRecord {
            seq,
            event,
            lapse: Cell::new(lapse),
            cycle: Cell::new(cycle),
            deadline: Cell::new(Instant::now() + lapse),
            shoot: Cell::new(false),
            payload,
        });
        self.table
            .insert(PayloadKey(rec.payload.boxed_clone()), Rc::downgrade(&rec));
        self.enqueue(&rec);
    }

    /// Recompute the deadline as now + lapse. Unknown payloads are a no-op.
    pub(crate) fn reset(&mut self, payload: &dyn TimerPayload) {
        if let Some(rec) = self.lookup(payload) {
            self.unqueue(&rec);
            rec.deadline.set(Instant::now() + rec.lapse.get());
            rec.shoot.set(false);
            self.enqueue(&rec);
        }
    }

    /// Remove the timer keyed by `payload`. Unknown payloads are a no-op. If
    /// a dispatcher frame is currently firing this timer, clearing `shoot`
    /// tells it to honor the removal.
    pub(crate) fn stop(&mut self, payload: &dyn TimerPayload) {
        if let Some(weak) = self.table.remove(payload) {
            if let Some(rec) = weak.upgrade() {
                self.unqueue(&rec);
                rec.shoot.set(false);
            }
        }
    }

    /// Earliest pending deadline, if any timer is installed.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.queue.first().map(|entry| entry.deadline)
    }

    /// The due timer with the least deadline. The record stays linked; the
    /// caller fires it and then calls [`TimerSet::complete`] if the handler
    /// left it untouched.
    pub(crate) fn next_due(&self, now: Instant) -> Option<Rc<TimerRecord>> {
        self.queue
            .first()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| Rc::clone(&entry.rec))
    }

    /// Post-firing bookkeeping: one-shot timers are removed, periodic timers
    /// advance by one lapse. A deadline that would still lie in the past is
    /// snapped to now + lapse instead of replaying the backlog.
    pub(crate) fn complete(&mut self, rec: &Rc<TimerRecord>, now: Instant) {
        match rec.cycle.get() {
            TimerCycle::OneShot => self.stop(rec.payload.as_ref()),
            TimerCycle::Periodic => {
                self.unqueue(rec);
                let mut deadline = rec.deadline.get() + rec.lapse.get();
                if deadline <= now {
                    deadline = now + rec.lapse.get();
                }
                rec.deadline.set(deadline);
                rec.shoot.set(false);
                self.enqueue(rec);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    fn lookup(&self, payload: &dyn TimerPayload) -> Option<Rc<TimerRecord>> {
        self.table.get(payload).and_then(Weak::upgrade)
    }

    fn enqueue(&mut self, rec: &Rc<TimerRecord>) {
        self.queue.insert(QueueEntry {
            deadline: rec.deadline.get(),
            seq: rec.seq,
            rec: Rc::clone(rec),
        });
    }

    fn unqueue(&mut self, rec: &Rc<TimerRecord>) {
        self.queue.remove(&QueueEntry {
            deadline: rec.deadline.get(),
            seq: rec.seq,
            rec: Rc::clone(rec),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_dispatch(set: &mut TimerSet, payload: impl TimerPayload, lapse_ms: u64, cycle: TimerCycle) {
        set.start(
            Box::new(payload),
            Duration::from_millis(lapse_ms),
            TimerEvent::Dispatch,
            cycle,
        );
    }

    #[test]
    fn test_same_payload_reprograms_in_place() {
        let mut set = TimerSet::new();
        start_dispatch(&mut set, 'a', 100, TimerCycle::OneShot);
        start_dispatch(&mut set, 'a', 500, TimerCycle::Periodic);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_distinct_values_and_types_coexist() {
        let mut set = TimerSet::new();
        start_dispatch(&mut set, 'a', 100, TimerCycle::OneShot);
        start_dispatch(&mut set, 'b', 100, TimerCycle::OneShot);
        start_dispatch(&mut set, 7u32, 100, TimerCycle::OneShot);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_stop_unknown_is_noop() {
        let mut set = TimerSet::new();
        start_dispatch(&mut set, 'a', 100, TimerCycle::OneShot);
        set.stop(&'z');
        set.reset(&'z');
        assert_eq!(set.len(), 1);
        set.stop(&'a');
        assert_eq!(set.len(), 0);
        assert!(set.next_deadline().is_none());
    }

    #[test]
    fn test_deadline_order_with_tiebreak() {
        let mut set = TimerSet::new();
        start_dispatch(&mut set, 'b', 50, TimerCycle::OneShot);
        start_dispatch(&mut set, 'a', 400, TimerCycle::OneShot);
        let due = set.next_due(Instant::now() + Duration::from_secs(1)).unwrap();
        assert_eq!(due.payload_any().downcast_ref::<char>(), Some(&'b'));
    }

    #[test]
    fn test_periodic_advance_keeps_phase() {
        let mut set = TimerSet::new();
        start_dispatch(&mut set, 'p', 100, TimerCycle::Periodic);
        let rec = set.next_due(Instant::now() + Duration::from_millis(150)).unwrap();
        let before = rec.deadline.get();
        // handler left the timer alone: regular advance
        set.complete(&rec, before + Duration::from_millis(1));
        assert_eq!(rec.deadline.get(), before + Duration::from_millis(100));
        // dispatcher lagged a full period: snap instead of catching up
        let lagging_now = rec.deadline.get() + Duration::from_millis(350);
        set.complete(&rec, lagging_now);
        assert_eq!(rec.deadline.get(), lagging_now + Duration::from_millis(100));
    }

    #[test]
    fn test_stop_during_firing_clears_shoot() {
        let mut set = TimerSet::new();
        start_dispatch(&mut set, 'x', 10, TimerCycle::Periodic);
        let rec = set.next_due(Instant::now() + Duration::from_secs(1)).unwrap();
        rec.set_shoot(true);
        set.stop(&'x');
        assert!(!rec.shoot());
        assert_eq!(set.len(), 0);
    }
}
