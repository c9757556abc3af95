// End-to-end scenarios for the run loop.
//
// A scripted mock backend stands in for the input devices and tokio's paused
// clock stands in for the pacing delay, so these run without hardware or
// real sleeps.

use std::io;

use typetrace_backend::source::mock::{other, press, release, MockContext, MockGate};
use typetrace_backend::{
    trace, Config, EmittedRecord, ExitStatus, JsonEmitter, KeyTracer, RawEventKind, Shutdown,
    TypeTraceError,
};

// =========================================================================
// Test Helpers
// =========================================================================

fn output_lines(emitter: &JsonEmitter<Vec<u8>>) -> Vec<String> {
    std::str::from_utf8(emitter.get_ref())
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect()
}

/// Run `context` through `trace` until its script is exhausted.
async fn run_script(context: MockContext) -> (ExitStatus, Vec<String>) {
    let shutdown = Shutdown::new();
    let context = context.shutdown_when_drained(&shutdown);
    let mut emitter = JsonEmitter::new(Vec::new());

    let status = trace(Ok(context), &Config::default(), &mut emitter, &shutdown).await;

    (status, output_lines(&emitter))
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test(start_paused = true)]
async fn single_press_yields_one_line() {
    let context = MockContext::new(MockGate::new()).then_events(vec![press(30)]);

    let (status, lines) = run_script(context).await;

    assert_eq!(status, ExitStatus::NoError);
    assert_eq!(lines, [r#"{"key_name": "KEY_A", "key_code": 30}"#]);
}

#[tokio::test(start_paused = true)]
async fn press_then_release_yields_only_the_press() {
    let context = MockContext::new(MockGate::new()).then_events(vec![press(30), release(30)]);

    let (_, lines) = run_script(context).await;

    assert_eq!(lines, [r#"{"key_name": "KEY_A", "key_code": 30}"#]);
}

#[tokio::test(start_paused = true)]
async fn press_and_release_across_dispatches() {
    let context = MockContext::new(MockGate::new())
        .then_events(vec![press(30)])
        .then_events(vec![release(30)]);

    let (_, lines) = run_script(context).await;

    assert_eq!(lines.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn seat_failure_exits_with_3_and_no_output() {
    let shutdown = Shutdown::new();
    let context = MockContext::new(MockGate::new())
        .with_seats(&["seat1"])
        .then_events(vec![press(30)]);
    let ledger = context.ledger();
    let mut emitter = JsonEmitter::new(Vec::new());

    let status = trace(Ok(context), &Config::default(), &mut emitter, &shutdown).await;

    assert_eq!(status, ExitStatus::SeatFailed);
    assert_eq!(status.code(), 3);
    assert_eq!(ledger.dispatches(), 0);
    assert!(emitter.get_ref().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dispatch_failure_after_n_emissions() {
    for n in 0..5u32 {
        let mut context = MockContext::new(MockGate::new());
        for code in 0..n {
            context = context.then_events(vec![other(), press(16 + code), release(16 + code)]);
        }
        let context = context
            .then_failure(io::ErrorKind::Other)
            .then_events(vec![press(30)]);

        let (status, lines) = run_script(context).await;

        assert_eq!(status, ExitStatus::LibinputFailed);
        assert_eq!(status.code(), 2);
        assert_eq!(lines.len(), n as usize);
        for line in &lines {
            assert!(line.starts_with(r#"{"key_name": "KEY_"#), "{line}");
            assert!(line.ends_with('}'), "{line}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn discovery_failure_exits_with_1() {
    let shutdown = Shutdown::new();
    let context: Result<MockContext, _> =
        Err(TypeTraceError::DiscoveryFailed(io::ErrorKind::NotFound.into()));
    let mut emitter = JsonEmitter::new(Vec::new());

    let status = trace(context, &Config::default(), &mut emitter, &shutdown).await;

    assert_eq!(status.code(), 1);
    assert!(emitter.get_ref().is_empty());
}

#[tokio::test(start_paused = true)]
async fn emission_order_matches_dispatch_order() {
    let codes = [35u32, 18, 38, 38, 24];
    let context = MockContext::new(MockGate::new())
        .then_events(codes[..2].iter().map(|&c| press(c)).collect())
        .then_events(vec![release(35), release(18)])
        .then_events(codes[2..].iter().flat_map(|&c| [press(c), release(c)]).collect());

    let (_, lines) = run_script(context).await;

    let emitted: Vec<u32> = lines
        .iter()
        .map(|l| serde_json::from_str::<EmittedRecord<'_>>(l).unwrap().key_code)
        .collect();
    assert_eq!(emitted, codes);
}

#[tokio::test(start_paused = true)]
async fn every_line_has_exactly_name_and_code() {
    let context = MockContext::new(MockGate::new())
        .then_events((0..0x300).step_by(7).map(press).collect());

    let (_, lines) = run_script(context).await;

    assert!(!lines.is_empty());
    for line in &lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        let fields = value.as_object().unwrap();
        assert_eq!(fields.len(), 2, "{line}");
        assert!(fields["key_name"].is_string(), "{line}");
        assert!(fields["key_code"].is_u64(), "{line}");
    }
}

#[tokio::test(start_paused = true)]
async fn non_keyboard_events_produce_nothing() {
    let context = MockContext::new(MockGate::new())
        .then_events(vec![other(); 16])
        .then_events(vec![other()]);

    let (status, lines) = run_script(context).await;

    assert_eq!(status, ExitStatus::NoError);
    assert!(lines.is_empty());
}

// =========================================================================
// Resource invariants
// =========================================================================

/// Every popped event is released before the next dispatch, for every mix of
/// emitted and ignored events up to eight per dispatch.
#[test]
fn every_event_is_released_before_the_next_dispatch() {
    const LEN: u32 = 8;

    for mask in 0..(1u32 << LEN) {
        let batch = |offset: u32| -> Vec<RawEventKind> {
            (0..LEN)
                .map(|i| {
                    if mask & (1 << i) != 0 {
                        press(30 + (i + offset) % 20)
                    } else if i % 2 == 0 {
                        other()
                    } else {
                        release(30 + i)
                    }
                })
                .collect()
        };

        let context = MockContext::new(MockGate::new())
            .then_events(batch(0))
            .then_events(batch(3))
            .then_events(vec![]);
        let ledger = context.ledger();
        let mut emitter = JsonEmitter::new(Vec::new());
        let mut tracer = KeyTracer::start(
            context,
            "seat0",
            &mut emitter,
            std::time::Duration::from_millis(1),
        )
        .unwrap();

        let mut emitted = 0;
        for _ in 0..3 {
            emitted += tracer.handle_events().unwrap();
        }
        drop(tracer);

        assert_eq!(ledger.leaks(), 0, "mask {mask:#010b}");
        assert_eq!(ledger.popped(), 2 * LEN as usize);
        assert_eq!(ledger.released(), ledger.popped());
        assert_eq!(emitted, 2 * mask.count_ones() as usize);
        assert_eq!(output_lines(&emitter).len(), emitted);
    }
}

#[test]
fn device_files_are_closed_exactly_once() {
    let gate = MockGate::new().deny("/dev/zero");
    let context = MockContext::new(gate.clone())
        .with_device("/dev/null")
        .with_device("/dev/zero")
        .with_device("/dev/full")
        .then_failure(io::ErrorKind::Other);
    let mut tracer =
        KeyTracer::start(context, "seat0", JsonEmitter::new(Vec::new()), Default::default())
            .unwrap();

    assert!(tracer.handle_events().is_err());
    drop(tracer);

    assert_eq!(gate.opened(), 2);
    assert_eq!(gate.closed(), 2);
}

#[test]
fn source_init_failure_exits_with_2() {
    let context = MockContext::new(MockGate::new()).failing_source_init();

    let err = KeyTracer::start(context, "seat0", JsonEmitter::new(Vec::new()), Default::default())
        .err()
        .unwrap();

    assert!(matches!(err, TypeTraceError::SourceInitFailed(_)));
    assert_eq!(err.exit_status().code(), 2);
}
