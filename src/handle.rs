/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Actor handles and the ownership protocol.
//!
//! [`ActorRef`] is the strong, cloneable address of an actor. Strong handles
//! participate in ownership: dropping the last one triggers the shutdown
//! protocol, joining the owning thread when the drop happens on a foreign
//! thread and detaching when the actor releases itself from its own handler
//! (a thread cannot join itself). [`WeakActorRef`] observes without keeping
//! the actor alive, and [`Gateway`] bundles a weak handle with sends that
//! silently no-op once the target is gone.

use std::any::TypeId;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::Channel;
use crate::mailbox::{MailboxCore, Parcel, Priority};
use crate::message::Message;

/// Ownership token shared by all strong handles. The drop of the last clone
/// runs the stop protocol, mirroring a custom deleter.
pub(crate) struct StopToken {
    core: Arc<MailboxCore>,
    join: Mutex<Option<JoinHandle<i32>>>,
}

impl StopToken {
    pub(crate) fn new(core: Arc<MailboxCore>) -> Self {
        StopToken {
            core,
            join: Mutex::new(None),
        }
    }

    pub(crate) fn set_join(&self, handle: JoinHandle<i32>) {
        *self.join.lock().unwrap() = Some(handle);
    }

    pub(crate) fn core(&self) -> &Arc<MailboxCore> {
        &self.core
    }

    fn shutdown(&self, code: Option<i32>) {
        self.core.initiate_stop(code);
        let handle = self.join.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                // self-stop from the owning thread: let the dispatcher run
                // out and release the actor after on_stop
                self.core.mark_detached();
                log::debug!("actor '{}' detached for self-termination", self.core.name());
            } else {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for StopToken {
    fn drop(&mut self) {
        self.shutdown(None);
    }
}

/// Strong, cloneable handle to an actor.
///
/// Keeps the actor alive; the drop of the last strong handle stops the actor
/// and releases its storage. Sends are fire-and-forget: ownership of the
/// message transfers to the runtime.
#[derive(Clone)]
pub struct ActorRef {
    token: Arc<StopToken>,
}

impl ActorRef {
    pub(crate) fn from_token(token: Arc<StopToken>) -> Self {
        ActorRef { token }
    }

    /// The actor's name (also the owning thread's name).
    pub fn name(&self) -> &str {
        self.token.core().name()
    }

    /// Enqueue a message at normal priority.
    pub fn send<T: Message>(&self, msg: T) {
        self.send_with(Priority::Normal, msg);
    }

    /// Enqueue a message at an explicit priority.
    pub fn send_with<T: Message>(&self, priority: Priority, msg: T) {
        self.token
            .core()
            .post(priority, Parcel::Message(Box::new(msg)));
    }

    /// Build a weak-bound emitter enqueueing on this actor at normal
    /// priority.
    pub fn channel<T: Message>(&self) -> Channel<T> {
        self.channel_with(Priority::Normal)
    }

    /// Build a weak-bound emitter enqueueing at an explicit priority.
    pub fn channel_with<T: Message>(&self, priority: Priority) -> Channel<T> {
        self.downgrade().channel_with(priority)
    }

    /// Bind `channel` as this actor's callback for `T`-typed publishes.
    ///
    /// The bind travels as a high-priority parcel, so it is ordered before
    /// any delivery enqueued afterwards.
    pub fn connect<T: Message>(&self, channel: Channel<T>) {
        self.token.core().post(
            Priority::High,
            Parcel::Bind {
                type_id: TypeId::of::<T>(),
                channel: Some(Box::new(channel)),
            },
        );
    }

    /// Clear this actor's callback slot for `T`.
    pub fn disconnect<T: Message>(&self) {
        self.token.core().post(
            Priority::High,
            Parcel::Bind {
                type_id: TypeId::of::<T>(),
                channel: None,
            },
        );
    }

    /// Sugar for [`connect`](ActorRef::connect): bind the receiver actor's
    /// own channel, so this actor's `T` publishes are delivered to it.
    pub fn connect_to<T: Message>(&self, receiver: &WeakActorRef) {
        self.connect(receiver.channel::<T>());
    }

    /// Amount of undispatched messages in this actor's mailbox.
    pub fn pending_messages(&self) -> usize {
        self.token.core().pending()
    }

    /// Block until the mailbox drains or `max_wait` elapses; returns whether
    /// it drained. A shutdown sequencing convenience, not a correctness
    /// primitive.
    pub fn wait_idle(&self, max_wait: Duration) -> bool {
        self.token.core().wait_idle(max_wait)
    }

    /// Whether a stop request is pending or completed.
    pub fn exiting(&self) -> bool {
        !self.token.core().is_dispatching()
    }

    /// Stop the actor with the default exit code. Idempotent; joins the
    /// owning thread when invoked from a foreign thread.
    pub fn stop(&self) {
        self.token.shutdown(None);
    }

    /// Stop the actor, recording `code` as its exit code. The first stop
    /// request wins.
    pub fn stop_with(&self, code: i32) {
        self.token.shutdown(Some(code));
    }

    /// Obtain a weak handle.
    pub fn downgrade(&self) -> WeakActorRef {
        WeakActorRef {
            token: Arc::downgrade(&self.token),
        }
    }
}

/// Weak handle: observes an actor without keeping it alive.
#[derive(Clone, Default)]
pub struct WeakActorRef {
    token: Weak<StopToken>,
}

impl WeakActorRef {
    /// A weak handle bound to nothing; `upgrade` always fails.
    pub fn new() -> Self {
        WeakActorRef { token: Weak::new() }
    }

    pub(crate) fn from_token(token: Weak<StopToken>) -> Self {
        WeakActorRef { token }
    }

    /// Recover a strong handle. Fails once the last strong handle is gone.
    pub fn upgrade(&self) -> Option<ActorRef> {
        self.token.upgrade().map(ActorRef::from_token)
    }

    /// Weak-bound emitter at normal priority; a silent no-op after the
    /// target is gone.
    pub fn channel<T: Message>(&self) -> Channel<T> {
        self.channel_with(Priority::Normal)
    }

    /// Weak-bound emitter at an explicit priority.
    pub fn channel_with<T: Message>(&self, priority: Priority) -> Channel<T> {
        let target = self.clone();
        Channel::new(move |msg: T| {
            if let Some(actor) = target.upgrade() {
                actor.send_with(priority, msg);
            }
        })
    }
}

/// Safe wrapper for targets of unknown lifecycle: a weak handle plus send
/// operations that become no-ops once the target is gone.
#[derive(Clone, Default)]
pub struct Gateway {
    actor: WeakActorRef,
}

impl Gateway {
    /// Wrap a weak handle.
    pub fn new(actor: WeakActorRef) -> Self {
        Gateway { actor }
    }

    /// Retarget the gateway.
    pub fn set(&mut self, actor: WeakActorRef) {
        self.actor = actor;
    }

    /// The current target, if still alive.
    pub fn get(&self) -> Option<ActorRef> {
        self.actor.upgrade()
    }

    /// Send at normal priority; dropped silently if the target is gone.
    pub fn send<T: Message>(&self, msg: T) {
        if let Some(actor) = self.get() {
            actor.send(msg);
        }
    }

    /// Send at an explicit priority; dropped silently if the target is gone.
    pub fn send_with<T: Message>(&self, priority: Priority, msg: T) {
        if let Some(actor) = self.get() {
            actor.send_with(priority, msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threadless_ref(name: &str) -> ActorRef {
        let core = Arc::new(MailboxCore::new(name.to_string()));
        ActorRef::from_token(Arc::new(StopToken::new(core)))
    }

    #[test]
    fn test_upgrade_fails_after_last_strong_drop() {
        let actor = threadless_ref("test");
        let weak = actor.downgrade();
        assert!(weak.upgrade().is_some());
        drop(actor);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_gateway_noop_after_target_gone() {
        let actor = threadless_ref("test");
        let gateway = Gateway::new(actor.downgrade());
        gateway.send(1u32);
        assert_eq!(actor.pending_messages(), 1);
        drop(actor);
        gateway.send(2u32); // silently dropped
        assert!(gateway.get().is_none());
    }

    #[test]
    fn test_channel_noop_after_target_gone() {
        let actor = threadless_ref("test");
        let channel = actor.channel::<u32>();
        channel.call(5);
        assert_eq!(actor.pending_messages(), 1);
        drop(actor);
        channel.call(6); // no target anymore
    }

    #[test]
    fn test_default_gateway_is_unbound() {
        let gateway = Gateway::default();
        assert!(gateway.get().is_none());
        gateway.send(1u32);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let actor = threadless_ref("test");
        actor.stop_with(4);
        actor.stop_with(9);
        assert!(actor.exiting());
    }
}
