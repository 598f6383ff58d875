//! Two-actor volley plus the core delivery invariants: serialized handlers,
//! per-producer FIFO, priority overtaking, and silence after stop.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use actor_thread::{
    create, handle_messages, handle_timers, Actor, ActorContext, Gateway, Message, Priority,
    TimerCycle, WeakActorRef,
};

struct SetPeer(WeakActorRef);

struct Ping {
    counter: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct VolleyOver;

struct Pinger {
    master: bool,
    peer: Gateway,
    running: bool,
    reported: bool,
    last_seen: u64,
    deliveries: Arc<AtomicU64>,
    report: mpsc::Sender<u64>,
}

handle_messages!(Pinger, SetPeer => on_set_peer, Ping => on_ping);
handle_timers!(Pinger, VolleyOver => on_volley_over);

impl Actor for Pinger {
    fn on_start(&mut self, ctx: &mut ActorContext) {
        if self.master {
            ctx.timer_start(VolleyOver, Duration::from_millis(400), TimerCycle::OneShot);
        }
    }

    fn process_message(&mut self, msg: &dyn Message, ctx: &mut ActorContext) {
        self.dispatch_message(msg, ctx);
    }

    fn process_timer(&mut self, payload: &dyn std::any::Any, ctx: &mut ActorContext) {
        self.dispatch_timer(payload, ctx);
    }
}

impl Pinger {
    fn on_set_peer(&mut self, msg: &SetPeer, _ctx: &mut ActorContext) {
        self.peer.set(msg.0.clone());
        if self.master {
            self.peer.send(Ping { counter: 1 });
        }
    }

    fn on_ping(&mut self, msg: &Ping, _ctx: &mut ActorContext) {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        assert!(msg.counter > self.last_seen, "volley counter went backwards");
        self.last_seen = msg.counter;
        if self.running {
            self.peer.send(Ping {
                counter: msg.counter + 1,
            });
        } else if !self.reported {
            let _ = self.report.send(msg.counter);
            self.reported = true;
        }
    }

    fn on_volley_over(&mut self, _payload: &VolleyOver, _ctx: &mut ActorContext) {
        self.running = false;
    }
}

#[test]
fn ping_pong_volley() {
    let deliveries = Arc::new(AtomicU64::new(0));
    let (report_tx, report_rx) = mpsc::channel();

    let new_pinger = |master: bool| Pinger {
        master,
        peer: Gateway::default(),
        running: true,
        reported: false,
        last_seen: 0,
        deliveries: Arc::clone(&deliveries),
        report: report_tx.clone(),
    };

    let ping = create("ping", new_pinger(true)).unwrap();
    let pong = create("pong", new_pinger(false)).unwrap();
    ping.send(SetPeer(pong.downgrade()));
    pong.send(SetPeer(ping.downgrade()));

    let final_count = report_rx.recv_timeout(Duration::from_secs(30)).unwrap();
    assert!(final_count >= 1);

    ping.stop();
    pong.stop();

    // nothing is delivered once stop has completed
    let seen = deliveries.load(Ordering::SeqCst);
    for _ in 0..10 {
        ping.send(Ping { counter: u64::MAX });
        pong.send(Ping { counter: u64::MAX });
    }
    thread::sleep(Duration::from_millis(100));
    assert_eq!(deliveries.load(Ordering::SeqCst), seen);
}

struct Record(u32);

struct Recorder {
    order: Arc<Mutex<Vec<u32>>>,
    gate: Option<mpsc::Receiver<()>>,
    in_handler: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

struct Block;

handle_messages!(Recorder, Block => on_block, Record => on_record);

impl Actor for Recorder {
    fn process_message(&mut self, msg: &dyn Message, ctx: &mut ActorContext) {
        if self.in_handler.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.dispatch_message(msg, ctx);
        self.in_handler.store(false, Ordering::SeqCst);
    }
}

impl Recorder {
    fn on_block(&mut self, _msg: &Block, _ctx: &mut ActorContext) {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
    }

    fn on_record(&mut self, msg: &Record, _ctx: &mut ActorContext) {
        self.order.lock().unwrap().push(msg.0);
    }
}

fn new_recorder(gate: Option<mpsc::Receiver<()>>) -> (Recorder, Arc<Mutex<Vec<u32>>>, Arc<AtomicUsize>) {
    let order = Arc::new(Mutex::new(Vec::new()));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let recorder = Recorder {
        order: Arc::clone(&order),
        gate,
        in_handler: Arc::new(AtomicBool::new(false)),
        overlaps: Arc::clone(&overlaps),
    };
    (recorder, order, overlaps)
}

#[test]
fn fifo_per_producer() {
    let (recorder, order, _) = new_recorder(None);
    let actor = create("recorder", recorder).unwrap();
    for value in 0..1000 {
        actor.send(Record(value));
    }
    assert!(actor.wait_idle(Duration::from_secs(10)));
    actor.stop();
    let seen = order.lock().unwrap();
    assert_eq!(*seen, (0..1000).collect::<Vec<_>>());
}

#[test]
fn high_priority_overtakes_queued_normal() {
    let (gate_tx, gate_rx) = mpsc::channel();
    let (recorder, order, _) = new_recorder(Some(gate_rx));
    let actor = create("recorder", recorder).unwrap();

    // park the dispatcher inside a handler, then queue both priorities
    actor.send(Block);
    thread::sleep(Duration::from_millis(50));
    for value in 0..10 {
        actor.send(Record(value));
    }
    for value in 100..105 {
        actor.send_with(Priority::High, Record(value));
    }
    gate_tx.send(()).unwrap();

    assert!(actor.wait_idle(Duration::from_secs(10)));
    actor.stop();
    let seen = order.lock().unwrap();
    assert_eq!(seen.len(), 15);
    assert_eq!(&seen[..5], &[100, 101, 102, 103, 104]);
    assert_eq!(&seen[5..], &(0..10).collect::<Vec<_>>()[..]);
}

#[test]
fn handlers_never_overlap() {
    let (recorder, order, overlaps) = new_recorder(None);
    let actor = create("recorder", recorder).unwrap();

    let mut producers = Vec::new();
    for p in 0..4 {
        let target = actor.clone();
        producers.push(thread::spawn(move || {
            for i in 0..500 {
                target.send(Record(p * 1000 + i));
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(actor.wait_idle(Duration::from_secs(10)));
    actor.stop();
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(order.lock().unwrap().len(), 2000);
}
