/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Dispatcher loop and actor lifecycle entry points.
//!
//! [`create`] spawns an owning thread for the actor; [`run`] turns the
//! calling thread into the owning thread and returns the exit code. The
//! dispatcher services timers in deadline order, delivers one parcel per
//! iteration (high priority first), honors retry pauses and panics, and
//! finishes with `on_stop` once a stop request arrives. In interleave mode a
//! foreign event loop owns the thread and drains the mailbox in bounded
//! batches through [`ActorContext::handle_actor_events`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::actor::{Actor, ActorContext};
use crate::error::ActorError;
use crate::handle::{ActorRef, StopToken};
use crate::mailbox::{MailboxCore, Parcel, Priority};
use crate::timer::{TimerCycle, TimerEvent};

/// Parcels drained per batch while a foreign loop owns the thread, so the
/// foreign loop is never starved.
const DRAIN_BATCH: usize = 64;

/// Exit code reported when a handler panic terminates the actor.
const PANIC_EXIT_CODE: i32 = 101;

/// Identity of the internal retry timer; a single instance per actor.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RetryTick;

/// Notification surface of interleave mode.
///
/// Registered via [`ActorContext::acquire_dispatcher`] and invoked by the
/// runtime, possibly from foreign threads (producers, stoppers), which is why
/// this lives on a shared object rather than on the actor. Implementations
/// must be cheap and non-blocking: typical ones write to a wakeup pipe the
/// foreign loop polls.
pub trait DispatchHooks: Send + Sync {
    /// New work arrived: please call
    /// [`ActorContext::handle_actor_events`] soon.
    fn on_waiting_events(&self);

    /// Schedule a delayed `handle_actor_events` call after `delay`.
    fn on_waiting_timer(&self, delay: Duration);

    /// Drop any pending delayed call.
    fn on_waiting_timer_cancel(&self);

    /// A stop request arrived; the foreign loop should return from
    /// `on_dispatching`.
    fn on_stopping(&self) {}
}

/// Configuration for an actor's owning thread.
#[derive(Clone)]
pub struct ThreadConfig {
    /// CPU cores to pin the thread to (empty = no pinning)
    pub affinity: Vec<usize>,
    /// Thread priority (1-99 for RT, 0 = default)
    pub priority: i32,
    /// Scheduling policy (SCHED_OTHER, SCHED_FIFO, SCHED_RR)
    pub sched_policy: i32,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        ThreadConfig {
            affinity: vec![],
            priority: 0,
            sched_policy: libc::SCHED_OTHER,
        }
    }
}

impl ThreadConfig {
    /// Create config with CPU affinity
    pub fn with_affinity(cores: Vec<usize>) -> Self {
        ThreadConfig {
            affinity: cores,
            ..Default::default()
        }
    }

    /// Create config with real-time priority
    pub fn with_priority(priority: i32, policy: i32) -> Self {
        ThreadConfig {
            priority,
            sched_policy: policy,
            ..Default::default()
        }
    }

    /// Apply to the calling thread; failures are logged, not fatal.
    fn apply(&self, name: &str) {
        #[cfg(target_os = "linux")]
        {
            if !self.affinity.is_empty() && !set_affinity(&self.affinity) {
                log::warn!("actor '{}': could not set CPU affinity", name);
            }
            if self.priority > 0 && !set_priority(self.priority, self.sched_policy) {
                log::warn!("actor '{}': could not set scheduler priority", name);
            }
        }
        #[cfg(not(target_os = "linux"))]
        if !self.affinity.is_empty() || self.priority > 0 {
            log::warn!(
                "actor '{}': thread affinity/priority unsupported on this platform",
                name
            );
        }
    }
}

/// Set CPU affinity for the current thread
#[cfg(target_os = "linux")]
fn set_affinity(cores: &[usize]) -> bool {
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        for &core in cores {
            libc::CPU_SET(core, &mut cpuset);
        }
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpuset) == 0
    }
}

/// Set scheduler priority for the current thread
#[cfg(target_os = "linux")]
fn set_priority(priority: i32, policy: i32) -> bool {
    unsafe {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        libc::sched_setscheduler(0, policy, &param) == 0
    }
}

/// Spawn a new owning thread for `actor` and return its strong handle.
pub fn create<A: Actor>(name: impl Into<String>, actor: A) -> Result<ActorRef, ActorError> {
    create_with(name, actor, ThreadConfig::default())
}

/// Spawn with an explicit [`ThreadConfig`].
pub fn create_with<A: Actor>(
    name: impl Into<String>,
    actor: A,
    config: ThreadConfig,
) -> Result<ActorRef, ActorError> {
    let name = name.into();
    let core = Arc::new(MailboxCore::new(name.clone()));
    let token = Arc::new(StopToken::new(Arc::clone(&core)));
    let self_token = Arc::downgrade(&token);
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            config.apply(core.name());
            ActorRuntime::new(actor, core, self_token).dispatch()
        })
        .map_err(|source| ActorError::Spawn {
            name: name.clone(),
            source,
        })?;
    token.set_join(handle);
    log::debug!("actor '{}' spawned", name);
    Ok(ActorRef::from_token(token))
}

/// Run `actor` on the calling thread; returns once the actor stops, with its
/// exit code.
pub fn run<A: Actor>(name: impl Into<String>, actor: A) -> i32 {
    let core = Arc::new(MailboxCore::new(name.into()));
    let token = Arc::new(StopToken::new(Arc::clone(&core)));
    let self_token = Arc::downgrade(&token);
    ActorRuntime::new(actor, core, self_token).dispatch()
}

/// One actor plus its owning-thread context: the dispatcher.
struct ActorRuntime<A: Actor> {
    actor: A,
    ctx: ActorContext,
}

impl<A: Actor> ActorRuntime<A> {
    fn new(actor: A, core: Arc<MailboxCore>, self_token: Weak<StopToken>) -> Self {
        ActorRuntime {
            actor,
            ctx: ActorContext::new(core, self_token),
        }
    }

    fn dispatch(mut self) -> i32 {
        let core = Arc::clone(&self.ctx.core);
        log::debug!("actor '{}' dispatching", core.name());
        self.actor.on_start(&mut self.ctx);

        while core.is_dispatching() {
            if self.ctx.take_acquire() {
                // interleave mode: the foreign loop owns the thread until it
                // returns from on_dispatching
                self.actor.on_dispatching(&mut self.ctx);
                if !self.ctx.acquire_pending() {
                    core.clear_hooks();
                }
                continue;
            }
            fire_due_timers(&mut self.actor, &mut self.ctx);
            if !core.is_dispatching() {
                break;
            }
            match core.try_take() {
                Some((parcel, priority)) => {
                    deliver(&mut self.actor, &mut self.ctx, parcel, priority)
                }
                None => core.wait_for_work(self.ctx.timers.next_deadline()),
            }
        }

        let fallback = self.actor.on_stop(&mut self.ctx);
        let code = core.finish(fallback);
        if core.is_detached() {
            log::debug!("actor '{}' released after self-termination", core.name());
        }
        log::debug!("actor '{}' stopped, exit code {}", core.name(), code);
        code
    }
}

/// Deliver one parcel to the actor, honoring retry requests and containing
/// handler panics.
fn deliver<A: Actor>(actor: &mut A, ctx: &mut ActorContext, parcel: Parcel, priority: Priority) {
    match parcel {
        Parcel::Bind { type_id, channel } => ctx.bind_slot(type_id, channel),
        Parcel::Message(msg) => {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                actor.process_message(msg.as_ref(), ctx)
            }));
            if let Err(panic) = outcome {
                log::error!(
                    "actor '{}': message handler panicked: {}",
                    ctx.core.name(),
                    panic_text(panic.as_ref())
                );
                ctx.retry = None;
                ctx.core.initiate_stop(Some(PANIC_EXIT_CODE));
                return;
            }
            if let Some(delay) = ctx.retry.take() {
                // put the message back and pause until the retry timer (or a
                // high-priority arrival) clears the pause
                ctx.core.pause_with(Parcel::Message(msg), priority);
                let core = Arc::clone(&ctx.core);
                ctx.timers.start(
                    Box::new(RetryTick),
                    delay,
                    TimerEvent::Callback(Box::new(move |_: &dyn Any| core.clear_pause())),
                    TimerCycle::OneShot,
                );
            }
        }
    }
}

/// Fire every due timer in deadline order.
fn fire_due_timers<A: Actor>(actor: &mut A, ctx: &mut ActorContext) {
    loop {
        let Some(rec) = ctx.timers.next_due(Instant::now()) else {
            break;
        };
        rec.set_shoot(true);
        let outcome = catch_unwind(AssertUnwindSafe(|| match rec.event() {
            TimerEvent::Dispatch => actor.process_timer(rec.payload_any(), ctx),
            TimerEvent::Callback(fire) => fire(rec.payload_any()),
        }));
        // the retry directive is reserved for message deliveries
        ctx.retry = None;
        if let Err(panic) = outcome {
            log::error!(
                "actor '{}': timer handler panicked: {}",
                ctx.core.name(),
                panic_text(panic.as_ref())
            );
            ctx.core.initiate_stop(Some(PANIC_EXIT_CODE));
        }
        if rec.shoot() {
            // untouched by its handler: remove or advance
            ctx.timers.complete(&rec, Instant::now());
        }
        if !ctx.core.is_dispatching() {
            break;
        }
    }
}

/// Bounded drain for interleave mode; see
/// [`ActorContext::handle_actor_events`].
pub(crate) fn handle_actor_events<A: Actor>(
    actor: &mut A,
    ctx: &mut ActorContext,
) -> Option<Duration> {
    let mut delivered = 0;
    while ctx.core.is_dispatching() {
        fire_due_timers(actor, ctx);
        if delivered == DRAIN_BATCH {
            break;
        }
        match ctx.core.try_take() {
            Some((parcel, priority)) => {
                deliver(actor, ctx, parcel, priority);
                delivered += 1;
            }
            None => break,
        }
    }

    let hooks = ctx.core.hooks();
    if ctx.core.has_deliverable() {
        // batch limit hit with parcels left over: ask for another drain
        if let Some(hooks) = &hooks {
            hooks.on_waiting_events();
        }
    }
    let rearm = ctx
        .timers
        .next_deadline()
        .map(|deadline| deadline.saturating_duration_since(Instant::now()));
    if let Some(hooks) = &hooks {
        match rearm {
            Some(delay) => hooks.on_waiting_timer(delay),
            None => hooks.on_waiting_timer_cancel(),
        }
    }
    rearm
}

fn panic_text(panic: &(dyn Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    struct Probe {
        seen: mpsc::Sender<i32>,
        stop_after: i32,
    }

    impl Actor for Probe {
        fn process_message(&mut self, msg: &dyn crate::Message, ctx: &mut ActorContext) {
            if let Some(value) = msg.as_any().downcast_ref::<i32>() {
                let _ = self.seen.send(*value);
                if *value >= self.stop_after {
                    ctx.stop_with(7);
                }
            }
        }
    }

    #[test]
    fn test_run_returns_stop_code() {
        struct Quitter;
        impl Actor for Quitter {
            fn on_start(&mut self, ctx: &mut ActorContext) {
                ctx.stop_with(42);
            }
            fn on_stop(&mut self, _ctx: &mut ActorContext) -> i32 {
                5 // overridden by the stop code
            }
        }
        assert_eq!(run("quitter", Quitter), 42);
    }

    #[test]
    fn test_run_falls_back_to_on_stop_code() {
        struct Quitter;
        impl Actor for Quitter {
            fn on_start(&mut self, ctx: &mut ActorContext) {
                ctx.stop();
            }
            fn on_stop(&mut self, _ctx: &mut ActorContext) -> i32 {
                5
            }
        }
        assert_eq!(run("quitter", Quitter), 5);
    }

    #[test]
    fn test_create_delivers_and_joins_on_last_drop() {
        let (tx, rx) = mpsc::channel();
        let probe = create(
            "probe",
            Probe {
                seen: tx,
                stop_after: 3,
            },
        )
        .unwrap();
        for value in 1..=3 {
            probe.send(value);
        }
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
        drop(probe); // joins the already-exiting owning thread
    }

    #[test]
    fn test_panicking_handler_stops_the_actor() {
        struct Fragile {
            polls: Arc<AtomicUsize>,
        }
        impl Actor for Fragile {
            fn on_start(&mut self, ctx: &mut ActorContext) {
                if let Some(me) = ctx.self_ref().upgrade() {
                    me.send(());
                }
            }
            fn process_message(&mut self, _msg: &dyn crate::Message, _ctx: &mut ActorContext) {
                panic!("boom");
            }
            fn on_stop(&mut self, _ctx: &mut ActorContext) -> i32 {
                self.polls.fetch_add(1, Ordering::SeqCst);
                0
            }
        }
        let polls = Arc::new(AtomicUsize::new(0));
        let code = run(
            "fragile",
            Fragile {
                polls: Arc::clone(&polls),
            },
        );
        assert_eq!(code, PANIC_EXIT_CODE);
        assert_eq!(polls.load(Ordering::SeqCst), 1); // on_stop still ran
    }
}
