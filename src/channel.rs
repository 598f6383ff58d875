/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Typed, weak-bound emitters.
//!
//! A [`Channel`] wraps an arbitrary callback behind a cloneable handle. The
//! channels built from actor handles hold only weak references, so invoking
//! one after its target actor is gone is a silent no-op.

use std::sync::Arc;

/// Cloneable callable that consumes values of one message type.
///
/// Built from [`ActorRef::channel`](crate::ActorRef::channel) (enqueues on
/// the target's mailbox) or from any closure via [`Channel::new`]. Channels
/// are the currency of the publish/subscribe plane and may also serve as
/// timer events.
pub struct Channel<T> {
    emit: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            emit: Arc::clone(&self.emit),
        }
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Wrap a callback into a channel.
    pub fn new(emit: impl Fn(T) + Send + Sync + 'static) -> Self {
        Channel {
            emit: Arc::new(emit),
        }
    }

    /// Invoke the channel with a value.
    pub fn call(&self, value: T) {
        (self.emit)(value)
    }
}
