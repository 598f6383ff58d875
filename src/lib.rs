/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! # Actor Thread - Active Object Runtime for Rust
//!
//! A thread-per-actor runtime: each actor owns one operating-system thread,
//! and every message sent to it becomes an asynchronous, serialized delivery
//! on that thread.
//!
//! ## Features
//!
//! - **One thread per actor**: handlers run single-threaded, the actor state
//!   needs no locking
//! - **Two-priority mailbox**: multi-producer FIFO queues; high priority
//!   overtakes
//! - **Payload-keyed timers**: periodic or one-shot, identified by payload
//!   value, safely reprogrammable from their own handler
//! - **Publish/subscribe channels**: weak-bound callbacks per payload type,
//!   rebindable at runtime
//! - **Lifecycle protocol**: drop the last handle, call `stop`, or let the
//!   actor terminate itself; backpressure via in-band retry
//! - **Foreign event loop interleaving**: hand the owning thread to an
//!   external dispatcher and drain in bounded batches
//!
//! ## Quick Start
//!
//! ```
//! use actor_thread::{create, handle_messages, Actor, ActorContext, Message};
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! struct Greet { who: &'static str }
//!
//! struct Greeter { done: mpsc::Sender<String> }
//!
//! handle_messages!(Greeter, Greet => on_greet);
//!
//! impl Actor for Greeter {
//!     fn process_message(&mut self, msg: &dyn Message, ctx: &mut ActorContext) {
//!         self.dispatch_message(msg, ctx);
//!     }
//! }
//!
//! impl Greeter {
//!     fn on_greet(&mut self, msg: &Greet, _ctx: &mut ActorContext) {
//!         let _ = self.done.send(format!("hello {}", msg.who));
//!     }
//! }
//!
//! let (tx, rx) = mpsc::channel();
//! let greeter = create("greeter", Greeter { done: tx }).unwrap();
//! greeter.send(Greet { who: "world" });
//! assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "hello world");
//! greeter.stop();
//! ```
//!
//! ## Timers
//!
//! Timers belong to the owning thread and are keyed by payload value:
//! starting a timer with an already-used payload reprograms it in place.
//!
//! ```no_run
//! use actor_thread::{Actor, ActorContext, TimerCycle};
//! use std::time::Duration;
//!
//! struct Heartbeat;
//! impl Actor for Heartbeat {
//!     fn on_start(&mut self, ctx: &mut ActorContext) {
//!         ctx.timer_start('h', Duration::from_millis(100), TimerCycle::Periodic);
//!     }
//!     fn process_timer(&mut self, _payload: &dyn std::any::Any, ctx: &mut ActorContext) {
//!         ctx.publish("beat".to_string());
//!     }
//! }
//!
//! let _exit_code = actor_thread::run("heartbeat", Heartbeat);
//! ```
//!
//! ## Publish/Subscribe
//!
//! An actor publishes values of any type; clients bind a [`Channel`] into
//! the publisher's per-type callback slot with
//! [`ActorRef::connect`]/[`ActorRef::connect_to`]. Channels hold weak
//! references only, so a dead subscriber is a silent no-op, and bind
//! requests travel at high priority so they order before subsequent
//! publishes.

pub mod actor;
pub mod channel;
pub mod error;
pub mod handle;
pub mod mailbox;
pub mod message;
pub mod runtime;
pub mod timer;

// Re-export commonly used types
pub use actor::{Actor, ActorContext};
pub use channel::Channel;
pub use error::ActorError;
pub use handle::{ActorRef, Gateway, WeakActorRef};
pub use mailbox::Priority;
pub use message::Message;
pub use runtime::{create, create_with, run, DispatchHooks, ThreadConfig};
pub use timer::{TimerCycle, TimerPayload};
