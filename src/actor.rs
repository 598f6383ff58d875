/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Actor trait and the owning-thread context.
//!
//! Actors are independent entities that process messages sequentially. Each
//! actor runs in its own thread with isolated state: handlers receive
//! `&mut self` plus an [`ActorContext`] holding the thread-confined runtime
//! state (timers, callback slots, control requests). The context is `!Send`,
//! so timer and publish operations cannot be invoked from a foreign thread.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::channel::Channel;
use crate::handle::{StopToken, WeakActorRef};
use crate::mailbox::MailboxCore;
use crate::message::Message;
use crate::runtime::{self, DispatchHooks};
use crate::timer::{TimerCycle, TimerEvent, TimerPayload, TimerSet};

/// Trait for all actors in the system.
///
/// Every method has a default implementation; an actor implements what it
/// needs. `process_message` and `process_timer` are usually generated with
/// the [`handle_messages!`](crate::handle_messages) and
/// [`handle_timers!`](crate::handle_timers) macros.
pub trait Actor: Send + 'static {
    /// Called once on the owning thread before any delivery.
    fn on_start(&mut self, _ctx: &mut ActorContext) {}

    /// Called once on the owning thread after the last delivery. The return
    /// value becomes the exit code unless a stop request carried one.
    fn on_stop(&mut self, _ctx: &mut ActorContext) -> i32 {
        0
    }

    /// Process one message.
    fn process_message(&mut self, _msg: &dyn Message, _ctx: &mut ActorContext) {}

    /// Process the firing of a timer started with
    /// [`ActorContext::timer_start`].
    fn process_timer(&mut self, _payload: &dyn Any, _ctx: &mut ActorContext) {}

    /// Hosts a foreign event loop after
    /// [`ActorContext::acquire_dispatcher`]; normal dispatching resumes when
    /// this returns.
    fn on_dispatching(&mut self, _ctx: &mut ActorContext) {}
}

/// Macro generating the typed message dispatch for an actor.
///
/// Expands to an inherent `dispatch_message` method performing the downcast
/// match; call it from `process_message`. Returns whether a handler matched.
///
/// # Example
/// ```
/// use actor_thread::{handle_messages, Actor, ActorContext, Message};
///
/// struct Ping { count: i32 }
/// struct Counter { total: i32 }
///
/// handle_messages!(Counter, Ping => on_ping);
///
/// impl Actor for Counter {
///     fn process_message(&mut self, msg: &dyn Message, ctx: &mut ActorContext) {
///         self.dispatch_message(msg, ctx);
///     }
/// }
///
/// impl Counter {
///     fn on_ping(&mut self, msg: &Ping, _ctx: &mut ActorContext) {
///         self.total += msg.count;
///     }
/// }
/// ```
#[macro_export]
macro_rules! handle_messages {
    ($actor_type:ty, $($msg_type:ty => $handler:ident),+ $(,)?) => {
        impl $actor_type {
            fn dispatch_message(
                &mut self,
                msg: &dyn $crate::Message,
                ctx: &mut $crate::ActorContext,
            ) -> bool {
                $(
                    if let Some(typed_msg) = msg.as_any().downcast_ref::<$msg_type>() {
                        self.$handler(typed_msg, ctx);
                        return true;
                    }
                )+
                false
            }
        }
    };
}

/// Macro generating the typed timer dispatch for an actor; the counterpart
/// of [`handle_messages!`](crate::handle_messages) for `process_timer`.
/// Expands to an inherent `dispatch_timer` method.
#[macro_export]
macro_rules! handle_timers {
    ($actor_type:ty, $($payload_type:ty => $handler:ident),+ $(,)?) => {
        impl $actor_type {
            fn dispatch_timer(
                &mut self,
                payload: &dyn ::std::any::Any,
                ctx: &mut $crate::ActorContext,
            ) -> bool {
                $(
                    if let Some(typed_payload) = payload.downcast_ref::<$payload_type>() {
                        self.$handler(typed_payload, ctx);
                        return true;
                    }
                )+
                false
            }
        }
    };
}

/// Owning-thread state handed to every handler invocation.
///
/// Holds the timer set, the publish/subscribe callback slots and the control
/// requests a handler may raise (retry, stop, dispatcher interleave). Only
/// the dispatcher creates contexts, which confines all of this state to the
/// owning thread.
pub struct ActorContext {
    pub(crate) core: Arc<MailboxCore>,
    pub(crate) timers: TimerSet,
    slots: HashMap<TypeId, Box<dyn Any>>,
    self_token: Weak<StopToken>,
    pub(crate) retry: Option<Duration>,
    acquire: bool,
}

impl ActorContext {
    pub(crate) fn new(core: Arc<MailboxCore>, self_token: Weak<StopToken>) -> Self {
        ActorContext {
            core,
            timers: TimerSet::new(),
            slots: HashMap::new(),
            self_token,
            retry: None,
            acquire: false,
        }
    }

    /// This actor's name.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// A weak handle to this very actor, e.g. for handing out to peers.
    pub fn self_ref(&self) -> WeakActorRef {
        WeakActorRef::from_token(self.self_token.clone())
    }

    /// Amount of undispatched messages in the own mailbox.
    pub fn pending_messages(&self) -> usize {
        self.core.pending()
    }

    /// Whether a stop request is pending; long-running handlers poll this.
    pub fn exiting(&self) -> bool {
        !self.core.is_dispatching()
    }

    /// Request stop from within a handler; the dispatcher exits after the
    /// current iteration.
    pub fn stop(&self) {
        self.core.initiate_stop(None);
    }

    /// Request stop with an explicit exit code.
    pub fn stop_with(&self, code: i32) {
        self.core.initiate_stop(Some(code));
    }

    /// Ask the dispatcher to redeliver the in-flight message after `delay`.
    ///
    /// The message returns to the front of its queue and the normal queue is
    /// paused until the delay elapses; high-priority parcels keep flowing and
    /// any new high-priority enqueue clears the pause immediately. A
    /// scheduling directive, not an error.
    pub fn retry_later(&mut self, delay: Duration) {
        self.retry = Some(delay);
    }

    /// Invoke the callback bound for `T`, if any. Unbound publishes are
    /// silently dropped.
    pub fn publish<T: Message>(&self, value: T) {
        if let Some(channel) = self.bound::<T>() {
            channel.call(value);
        }
    }

    /// A clone of the callback currently bound for `T`. Handy as a timer
    /// event for periodic publishes.
    pub fn bound_channel<T: Message>(&self) -> Option<Channel<T>> {
        self.bound::<T>().cloned()
    }

    fn bound<T: Message>(&self) -> Option<&Channel<T>> {
        self.slots
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_ref::<Channel<T>>())
    }

    pub(crate) fn bind_slot(&mut self, type_id: TypeId, channel: Option<Box<dyn Any + Send>>) {
        match channel {
            Some(channel) => {
                self.slots.insert(type_id, channel);
            }
            None => {
                self.slots.remove(&type_id);
            }
        }
    }

    /// Install or reprogram the timer keyed by `payload`; firings dispatch to
    /// [`Actor::process_timer`].
    pub fn timer_start<P: TimerPayload>(&mut self, payload: P, lapse: Duration, cycle: TimerCycle) {
        self.timers
            .start(Box::new(payload), lapse, TimerEvent::Dispatch, cycle);
    }

    /// Install or reprogram the timer keyed by `payload` with an explicit
    /// event channel receiving the payload on every firing.
    pub fn timer_start_with<P: TimerPayload + Clone>(
        &mut self,
        payload: P,
        lapse: Duration,
        event: Channel<P>,
        cycle: TimerCycle,
    ) {
        let fire = move |any: &dyn Any| {
            if let Some(payload) = any.downcast_ref::<P>() {
                event.call(payload.clone());
            }
        };
        self.timers.start(
            Box::new(payload),
            lapse,
            TimerEvent::Callback(Box::new(fire)),
            cycle,
        );
    }

    /// Recompute the timer's deadline as now + lapse. Unknown payloads are a
    /// no-op.
    pub fn timer_reset<P: TimerPayload>(&mut self, payload: &P) {
        self.timers.reset(payload);
    }

    /// Remove the timer keyed by `payload`, suppressing an in-flight firing's
    /// rescheduling. Unknown payloads are a no-op.
    pub fn timer_stop<P: TimerPayload>(&mut self, payload: &P) {
        self.timers.stop(payload);
    }

    /// Request interleave mode: at the next dispatcher iteration,
    /// [`Actor::on_dispatching`] is invoked and the foreign loop behind
    /// `hooks` takes over the owning thread until it returns.
    pub fn acquire_dispatcher(&mut self, hooks: Arc<dyn DispatchHooks>) {
        self.core.set_hooks(hooks);
        self.acquire = true;
    }

    /// Drain up to one batch of parcels and service due timers; the workhorse
    /// a foreign loop calls from inside [`Actor::on_dispatching`].
    ///
    /// Returns the delay after which a timed call-back is wanted, or `None`
    /// to cancel a previously requested delay; the same decision is pushed
    /// through [`DispatchHooks::on_waiting_timer`] /
    /// [`DispatchHooks::on_waiting_timer_cancel`].
    pub fn handle_actor_events<A: Actor>(&mut self, actor: &mut A) -> Option<Duration> {
        runtime::handle_actor_events(actor, self)
    }

    pub(crate) fn take_acquire(&mut self) -> bool {
        std::mem::take(&mut self.acquire)
    }

    pub(crate) fn acquire_pending(&self) -> bool {
        self.acquire
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn test_context() -> ActorContext {
        ActorContext::new(Arc::new(MailboxCore::new("test".into())), Weak::new())
    }

    #[test]
    fn test_publish_without_binding_is_silent() {
        let ctx = test_context();
        ctx.publish(42u32);
        assert!(ctx.bound_channel::<u32>().is_none());
    }

    #[test]
    fn test_bind_replace_and_unbind() {
        let mut ctx = test_context();
        let hits = Arc::new(AtomicI32::new(0));

        let sink = Arc::clone(&hits);
        let first = Channel::new(move |value: i32| {
            sink.fetch_add(value, Ordering::SeqCst);
        });
        ctx.bind_slot(TypeId::of::<i32>(), Some(Box::new(first)));
        ctx.publish(1i32);

        let sink = Arc::clone(&hits);
        let second = Channel::new(move |value: i32| {
            sink.fetch_add(10 * value, Ordering::SeqCst);
        });
        ctx.bind_slot(TypeId::of::<i32>(), Some(Box::new(second)));
        ctx.publish(1i32);

        ctx.bind_slot(TypeId::of::<i32>(), None);
        ctx.publish(1i32);

        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_macro_dispatch() {
        struct Tick;
        struct Tock;

        struct Clock {
            ticks: i32,
        }

        handle_messages!(Clock, Tick => on_tick);

        impl Clock {
            fn on_tick(&mut self, _msg: &Tick, _ctx: &mut ActorContext) {
                self.ticks += 1;
            }
        }

        let mut ctx = test_context();
        let mut clock = Clock { ticks: 0 };
        assert!(clock.dispatch_message(&Tick, &mut ctx));
        assert!(!clock.dispatch_message(&Tock, &mut ctx));
        assert_eq!(clock.ticks, 1);
    }

    #[test]
    fn test_self_ref_unbound_in_isolation() {
        let ctx = test_context();
        assert!(ctx.self_ref().upgrade().is_none());
        assert_eq!(ctx.name(), "test");
    }
}
