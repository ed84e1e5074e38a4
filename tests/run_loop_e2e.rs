use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use tes_store::runtime::{spawn, RunLoopConfig};
use tes_store::{Command, Expectation, FailureKind, LifecycleState, LoopExit, Lookup, NewEvent, Response, Value};

const WAIT: Duration = Duration::from_secs(5);

fn add(fields: NewEvent) -> Command {
    Command::AddEvent { event: fields.build() }
}

#[test]
fn expected_event_is_not_found_then_delete_and_audit() {
    let handle = spawn(&RunLoopConfig::default()).unwrap();

    handle
        .send(Command::ExpectEvent {
            expectations: vec![Expectation::eq("event_type", "sms_sent")],
        })
        .unwrap();
    let Ok(Response::Lookup { result }) = handle.results().recv_timeout(WAIT) else {
        panic!("expected lookup response");
    };
    assert_eq!(result, Lookup::NotFound);

    for event_type in ["heartbeat", "login", "heartbeat", "logout", "heartbeat"] {
        handle.send(add(NewEvent::new("agent", event_type))).unwrap();
    }
    handle
        .send(Command::DeleteMatchingEvents {
            expectations: vec![Expectation::eq("event_type", "heartbeat")],
        })
        .unwrap();
    let Ok(Response::Count { removed }) = handle.results().recv_timeout(WAIT) else {
        panic!("expected count response");
    };
    assert_eq!(removed, 3);

    handle.send(Command::GetAllEvents).unwrap();
    let Ok(Response::Events { events }) = handle.results().recv_timeout(WAIT) else {
        panic!("expected events response");
    };
    let ids: Vec<u64> = events.iter().map(|e| e.id().value()).collect();
    assert_eq!(ids, vec![1, 3]);

    handle.send(Command::GetFullEventLog).unwrap();
    let Ok(Response::EventLog { entries }) = handle.results().recv_timeout(WAIT) else {
        panic!("expected event log response");
    };
    let states: Vec<LifecycleState> = entries.iter().map(|e| e.state()).collect();
    assert_eq!(
        states,
        vec![
            LifecycleState::Deleted,
            LifecycleState::Active,
            LifecycleState::Deleted,
            LifecycleState::Active,
            LifecycleState::Deleted,
        ]
    );

    handle.send(Command::Shutdown).unwrap();
    assert_eq!(handle.join().unwrap(), LoopExit::Shutdown);
}

#[test]
fn extended_debug_reports_the_near_miss() {
    let handle = spawn(&RunLoopConfig::default()).unwrap();
    handle
        .send(add(NewEvent::empty().field("correlation_id", "c1").field("status", "failed")))
        .unwrap();
    handle
        .send(add(NewEvent::empty().field("correlation_id", "c2").field("status", "ok")))
        .unwrap();

    let status = Expectation::eq("status", "ok");
    handle
        .send(Command::ExpectEventExtendedDebug {
            expectations: vec![Expectation::eq("correlation_id", "c1"), status.clone()],
            partial_filter: vec![Expectation::eq("correlation_id", "c1")],
        })
        .unwrap();
    let Ok(Response::ExtendedLookup { result }) = handle.results().recv_timeout(WAIT) else {
        panic!("expected extended lookup response");
    };

    assert_eq!(result.event, Lookup::NotFound);
    assert_eq!(result.partial_matches.len(), 1);
    let partial = &result.partial_matches[0];
    assert_eq!(partial.event.id().value(), 0);
    assert_eq!(partial.failures.len(), 1);
    assert_eq!(partial.failures[0].expectation, status);
    assert_eq!(
        partial.failures[0].kind,
        FailureKind::ComparisonFailure {
            observed: Value::from("failed")
        }
    );
}

#[test]
fn many_producers_feed_one_loop() {
    let handle = spawn(&RunLoopConfig {
        queue_capacity: Some(8),
        ..RunLoopConfig::default()
    })
    .unwrap();

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let producer = handle.sender();
            thread::spawn(move || {
                for n in 0..25 {
                    producer
                        .send(add(NewEvent::new(format!("worker-{worker}"), "tick").field("n", n)))
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    handle.send(Command::GetAllEvents).unwrap();
    let Ok(Response::Events { events }) = handle.results().recv_timeout(WAIT) else {
        panic!("expected events response");
    };
    assert_eq!(events.len(), 100);
    for (idx, event) in events.iter().enumerate() {
        assert_eq!(event.id().value(), idx as u64);
    }

    handle
        .send(Command::GetAllMatchingEvents {
            expectations: vec![Expectation::eq("event_source", "worker-2"), Expectation::gte("n", 20)],
        })
        .unwrap();
    let Ok(Response::Events { events }) = handle.results().recv_timeout(WAIT) else {
        panic!("expected events response");
    };
    assert_eq!(events.len(), 5);
}

#[test]
fn json_frames_drive_the_loop() {
    let handle = spawn(&RunLoopConfig::default()).unwrap();
    let frames = [
        r#"{"type": "add_event", "event": {"event_source": "web", "event_type": "hit", "path": "/a"}}"#,
        r#"{"type": "not_a_command", "whatever": true}"#,
        r#"{"type": "expect_event", "expectations": [{"field_name": "path", "operator": "in", "value": ["/a", "/b"]}]}"#,
    ];
    for frame in frames {
        handle.send(Command::from_json(frame).unwrap()).unwrap();
    }

    let Ok(Response::Lookup { result }) = handle.results().recv_timeout(WAIT) else {
        panic!("expected lookup response");
    };
    let event = result.into_event().unwrap();
    assert_eq!(event.field("path").as_deref(), Some(&Value::from("/a")));

    let json = serde_json::to_value(&Response::Lookup {
        result: Lookup::NotFound,
    })
    .unwrap();
    assert_eq!(json["result"]["status"], "not_found");
}

#[test]
fn dropping_the_handle_shuts_the_loop_down() {
    let handle = spawn(&RunLoopConfig::default()).unwrap();
    let producer = handle.sender();
    drop(handle);

    assert!(producer.send(Command::GetAllEvents).is_err());
}

#[test]
fn results_channel_closes_on_shutdown() {
    let handle = spawn(&RunLoopConfig::default()).unwrap();
    handle.send(Command::Shutdown).unwrap();
    assert_eq!(
        handle.results().recv_timeout(WAIT),
        Err(RecvTimeoutError::Disconnected)
    );
}
