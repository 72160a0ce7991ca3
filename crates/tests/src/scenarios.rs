//! End-to-end scenarios exercised over the loopback wire.

use std::sync::Arc;

use channel::{ChannelError, ChannelEvent, Delivery, Dialect, Message, Origin, PeerHandle};
use host::PeerEvent;
use pacer::{Clock, ManualClock, Pacer};
use parking_lot::Mutex;
use serde_json::json;

use crate::harness;

const BUDGET: usize = 32;

/// RUN, WAIT(100), RUN — output order holds with >= 100ms gap.
#[test]
fn run_wait_run_preserves_order_with_the_gap() {
    let clock = Arc::new(ManualClock::new());
    let pacer = Pacer::new(Arc::clone(&clock) as Arc<dyn Clock>);
    let log = Arc::new(Mutex::new(Vec::new()));

    {
        let log = Arc::clone(&log);
        let clock = Arc::clone(&clock);
        pacer.enqueue_run(move || log.lock().push(("1", clock.now_ms())));
    }
    pacer.enqueue_wait(100);
    {
        let log = Arc::clone(&log);
        let clock = Arc::clone(&clock);
        pacer.enqueue_run(move || log.lock().push(("2", clock.now_ms())));
    }

    loop {
        pacer.pump();
        match pacer.next_deadline() {
            Some(deadline) => clock.advance_to(deadline),
            None => break,
        }
    }

    let log = log.lock();
    assert_eq!(log[0].0, "1");
    assert_eq!(log[1].0, "2");
    assert!(
        log[1].1 - log[0].1 >= 100,
        "observed only {}ms between the two prints",
        log[1].1 - log[0].1
    );
}

/// A command sent before the handshake is buffered and goes out
/// exactly once after READY.
#[test]
fn pre_handshake_send_is_buffered_until_ready() {
    let mut p = harness::pair(Dialect::Messenger);
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        p.sandbox
            .add_command("customCmd", move |value| seen.lock().push(value.clone()));
    }

    p.host
        .send_command("customCmd", json!({"x": 1}), 0)
        .expect("buffered send");
    assert_eq!(
        p.sandbox_inbox.pending(),
        0,
        "nothing may cross the wire before the handshake"
    );

    p.host.connect().expect("connect");
    harness::shuttle(&mut p);

    assert_eq!(
        seen.lock().clone(),
        vec![json!({"x": 1})],
        "exactly one customCmd with the original value"
    );
}

/// Duplicate registration leaves the first handler in effect.
#[test]
fn duplicate_registration_first_handler_wins() {
    let mut p = harness::connected_pair(Dialect::Messenger);
    let hits_a = Arc::new(Mutex::new(0u32));
    let hits_b = Arc::new(Mutex::new(0u32));
    {
        let hits = Arc::clone(&hits_a);
        p.sandbox.add_command("foo", move |_| *hits.lock() += 1);
    }
    {
        let hits = Arc::clone(&hits_b);
        p.sandbox.add_command("foo", move |_| *hits.lock() += 1);
    }

    p.host.send_command("foo", json!({}), 0).expect("send foo");
    harness::shuttle(&mut p);

    assert_eq!(*hits_a.lock(), 1, "fnA handles the message");
    assert_eq!(*hits_b.lock(), 0, "fnB is never invoked");
}

/// The initiator computes three non-negative durations from the
/// echoed token's timestamps.
#[test]
fn handshake_latency_from_staged_timestamps() {
    let mut p = harness::pair(Dialect::Messenger);
    p.clock.advance(100);
    p.host.connect().expect("connect");

    p.clock.advance(5);
    for delivery in p.sandbox_inbox.drain() {
        p.sandbox.receive(delivery).expect("sandbox handshake");
    }

    p.clock.advance(7);
    for delivery in p.host_inbox.drain() {
        p.host.receive(delivery).expect("host echo");
    }

    let events = p.host.drain_events(BUDGET);
    let latency = events
        .iter()
        .find_map(|event| match event {
            PeerEvent::Ready { latency } => *latency,
            _ => None,
        })
        .expect("ready event with latency");
    assert_eq!(latency.send_ms, 5);
    assert_eq!(latency.response_ms, 7);
    assert_eq!(latency.total_ms, 12);
}

/// Delivering a message with an unregistered name raises an
/// error naming the command.
#[test]
fn unknown_command_raises_a_named_error() {
    let mut p = harness::connected_pair(Dialect::Messenger);

    p.host
        .send_command("doesNotExist", json!({}), 0)
        .expect("transmit succeeds; the receiver objects");
    let deliveries = p.sandbox_inbox.drain();
    assert_eq!(deliveries.len(), 1);
    let err = p.sandbox.receive(deliveries.into_iter().next().expect("one delivery"));
    match err {
        Err(ChannelError::UnknownCommand { name }) => assert_eq!(name, "doesNotExist"),
        other => panic!("expected UnknownCommand, got {other:?}"),
    }
}

#[test]
fn both_sides_report_ready_after_the_handshake() {
    let mut p = harness::connected_pair(Dialect::Messenger);

    let host_events = p.host.drain_events(BUDGET);
    assert!(host_events.iter().any(|event| matches!(
        event,
        PeerEvent::Ready { latency: Some(_) }
    )));

    let sandbox_events = p.sandbox.poll();
    assert!(sandbox_events.contains(&ChannelEvent::Ready { latency: None }));
}

#[test]
fn ping_pong_measures_the_round_trip() {
    let mut p = harness::connected_pair(Dialect::Messenger);

    p.host.ping().expect("ping");
    for delivery in p.sandbox_inbox.drain() {
        p.sandbox.receive(delivery).expect("sandbox ping");
    }
    p.clock.advance(3);
    for delivery in p.host_inbox.drain() {
        p.host.receive(delivery).expect("host pong");
    }

    let events = p.host.drain_events(BUDGET);
    assert!(
        events.contains(&PeerEvent::Pong {
            id: 0,
            elapsed_ms: 3
        }),
        "expected a pong with 3ms elapsed, got {events:?}"
    );
}

#[test]
fn exec_round_trips_through_the_sandbox_executor() {
    let mut p = harness::connected_pair(Dialect::Messenger);

    let id = p.host.exec("19 + 23").expect("exec request");
    harness::shuttle(&mut p);

    let events = p.host.drain_events(BUDGET);
    assert!(
        events.contains(&PeerEvent::ExecResult {
            id,
            result: json!(42)
        }),
        "expected the evaluated sum, got {events:?}"
    );
}

#[test]
fn start_program_runs_monitor_then_program_and_started_flows_back() {
    let mut p = harness::connected_pair(Dialect::Messenger);
    let order = Arc::new(Mutex::new(Vec::new()));
    {
        let order = Arc::clone(&order);
        p.sandbox.on_monitor_start(move || order.lock().push("monitor"));
    }
    {
        let order = Arc::clone(&order);
        p.sandbox.on_program_start(move || order.lock().push("program"));
    }

    p.host.start_program().expect("start");
    harness::shuttle(&mut p);
    assert_eq!(order.lock().clone(), vec!["monitor", "program"]);

    p.sandbox.notify_started().expect("started");
    harness::shuttle(&mut p);
    let events = p.host.drain_events(BUDGET);
    assert!(events.contains(&PeerEvent::ProgramStarted));
}

#[test]
fn gamepad_samples_pass_through_to_the_sandbox_hook() {
    let mut p = harness::connected_pair(Dialect::Messenger);
    let samples = Arc::new(Mutex::new(Vec::new()));
    {
        let samples = Arc::clone(&samples);
        p.sandbox.on_gamepad(move |value| samples.lock().push(value.clone()));
    }

    let sample = host::GamepadSample {
        buttons: vec![true, false],
        axes: vec![0.5, -1.0],
    };
    p.host.send_gamepad(&sample).expect("gamepad");
    harness::shuttle(&mut p);

    let samples = samples.lock();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0]["buttons"], json!([true, false]));
}

#[test]
fn runner_dialect_spells_the_envelope_with_command() {
    let mut p = harness::connected_pair(Dialect::Runner);
    let seen = Arc::new(Mutex::new(0u32));
    {
        let seen = Arc::clone(&seen);
        p.sandbox.add_command("setRGBLED", move |_| *seen.lock() += 1);
    }

    p.host
        .send_command("setRGBLED", json!([0, 255, 0]), 0)
        .expect("send");
    let deliveries = p.sandbox_inbox.drain();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].payload["command"], "setRGBLED");
    assert!(
        deliveries[0].payload.get("name").is_none(),
        "runner dialect must not carry the messenger field"
    );
    for delivery in deliveries {
        p.sandbox.receive(delivery).expect("receive");
    }
    assert_eq!(*seen.lock(), 1);
}

#[test]
fn forged_sender_identities_are_ignored() {
    let mut p = harness::connected_pair(Dialect::Messenger);
    let hits = Arc::new(Mutex::new(0u32));
    {
        let hits = Arc::clone(&hits);
        p.sandbox.add_command("cmd", move |_| *hits.lock() += 1);
    }
    let payload = Dialect::Messenger.encode(&Message::bare("cmd"));

    p.sandbox_inbox.inject(Delivery {
        from: PeerHandle(99),
        origin: Origin::new("https://editor.test"),
        payload: payload.clone(),
    });
    p.sandbox_inbox.inject(Delivery {
        from: PeerHandle(1),
        origin: Origin::new("https://evil.test"),
        payload,
    });
    for delivery in p.sandbox_inbox.drain() {
        p.sandbox
            .receive(delivery)
            .expect("forged identities are dropped, not raised");
    }
    assert_eq!(*hits.lock(), 0, "no handler runs for a forged identity");
}

#[test]
fn delayed_command_sequence_arrives_in_order_with_the_gap() {
    let mut p = harness::connected_pair(Dialect::Messenger);
    let seen: Arc<Mutex<Vec<(u64, i64)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        let clock = Arc::clone(&p.clock);
        p.sandbox.add_command("rotatePower", move |value| {
            let power = value["power"].as_i64().unwrap_or(0);
            seen.lock().push((clock.now_ms(), power));
        });
    }

    let t0 = p.clock.now_ms();
    p.host
        .send_command("rotatePower", json!({"power": 80}), 0)
        .expect("move");
    p.host
        .send_command("rotatePower", json!({"power": 0}), 2000)
        .expect("auto-stop");
    harness::shuttle(&mut p);
    assert_eq!(seen.lock().len(), 1, "the stop must still be waiting");

    p.clock.advance(2000);
    p.host.drain_events(BUDGET); // pump the host pacer
    harness::shuttle(&mut p);

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1, 80);
    assert_eq!(seen[1].1, 0);
    assert!(
        seen[1].0 - t0 >= 2000,
        "stop observed {}ms after move was scheduled",
        seen[1].0 - t0
    );
}

#[test]
fn disconnect_tears_the_channel_down() {
    let mut p = harness::connected_pair(Dialect::Messenger);
    p.host.disconnect();

    let err = p.host.send_command("cmd", json!({}), 0).unwrap_err();
    assert!(matches!(err, ChannelError::TornDown));
    assert_eq!(p.sandbox_inbox.pending(), 0);
}
