use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{self, Interval, MissedTickBehavior};

use crate::cli::Config;
use crate::emitter::KeyEventSink;
use crate::error::ExitStatus;
use crate::keyboard::classify;
use crate::source::{DeviceContext, EventSource};
use crate::TypeTraceResult;

/// The shortest pause between two iterations of the run loop.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Asks the run loop to stop before its next iteration.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Trigger the shutdown on the first `SIGINT` or `SIGTERM`.
    pub async fn on_signals(self) -> io::Result<()> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT, shutting down."),
            _ = terminate.recv() => info!("Received SIGTERM, shutting down."),
        }

        self.trigger();

        Ok(())
    }
}

/// Paces the run loop on a monotonic clock.
#[derive(Debug)]
pub struct Pacer(Interval);

impl Pacer {
    /// Must be called from within a tokio runtime.
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval(period.max(MIN_INTERVAL));
        // A slow iteration delays the schedule instead of bursting to catch up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self(interval)
    }

    pub async fn tick(&mut self) {
        self.0.tick().await;
    }
}

/// The run loop: pulls events from the source, emits the key presses.
///
/// Dropping the tracer releases the event source first, then the device
/// context.
pub struct KeyTracer<C: DeviceContext, E> {
    source: C::Source,
    _context: C,
    sink: E,
    interval: Duration,
}

impl<C: DeviceContext, E: KeyEventSink> KeyTracer<C, E> {
    /// Bind an event source to `context` and assign it to `seat`.
    ///
    /// On failure everything acquired so far is released before the error is
    /// returned.
    pub fn start(mut context: C, seat: &str, sink: E, interval: Duration) -> TypeTraceResult<Self> {
        let mut source = context.open_source()?;
        source.assign_seat(seat)?;
        info!("Event source initialized successfully with {seat}.");

        Ok(Self {
            source,
            _context: context,
            sink,
            interval,
        })
    }

    /// Run until `shutdown` is triggered or an error occurs.
    pub async fn run(mut self, shutdown: &Shutdown) -> TypeTraceResult<()> {
        let mut pacer = Pacer::new(self.interval);

        while !shutdown.is_triggered() {
            self.handle_events()?;
            pacer.tick().await;
        }

        debug!("Run loop stopped.");

        Ok(())
    }

    /// Dispatch once and drain the event queue.
    ///
    /// Returns the number of key presses emitted. Every event is released
    /// before this returns, whether it was emitted, ignored, or an error
    /// cut the drain short.
    pub fn handle_events(&mut self) -> TypeTraceResult<usize> {
        self.source.dispatch()?;

        let mut emitted = 0;
        while let Some(event) = self.source.next_event() {
            match classify(&event) {
                Some(key) => {
                    self.sink.handle_key(&key)?;
                    emitted += 1;
                }
                None => trace!("Ignoring {event:?}"),
            }
        }

        Ok(emitted)
    }
}

/// Start a tracer on `context` and run it to completion.
///
/// Any failure is logged and mapped to the exit status the process should
/// terminate with.
pub async fn trace<C, E>(
    context: TypeTraceResult<C>,
    config: &Config,
    sink: E,
    shutdown: &Shutdown,
) -> ExitStatus
where
    C: DeviceContext,
    E: KeyEventSink,
{
    let started = context.and_then(|c| KeyTracer::start(c, &config.seat, sink, config.interval));
    let result = match started {
        Ok(tracer) => tracer.run(shutdown).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitStatus::NoError,
        Err(e) => {
            let status = e.exit_status();
            error!("{e} (exit code {})", status.code());
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::JsonEmitter;
    use crate::error::TypeTraceError;
    use crate::source::mock::{other, press, release, MockContext, MockGate};

    fn lines(emitter: &JsonEmitter<Vec<u8>>) -> Vec<String> {
        String::from_utf8(emitter.get_ref().clone())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn handle_events_emits_presses_only() {
        let context = MockContext::new(MockGate::new())
            .then_events(vec![press(30), other(), release(30), press(0x2fe)]);
        let ledger = context.ledger();
        let mut emitter = JsonEmitter::new(Vec::new());
        let mut tracer = KeyTracer::start(context, "seat0", &mut emitter, MIN_INTERVAL).unwrap();

        assert_eq!(tracer.handle_events().unwrap(), 2);
        drop(tracer);

        assert_eq!(ledger.popped(), 4);
        assert_eq!(ledger.released(), 4);
        assert_eq!(
            lines(&emitter),
            [
                r#"{"key_name": "KEY_A", "key_code": 30}"#,
                r#"{"key_name": "unknown", "key_code": 766}"#,
            ]
        );
    }

    #[test]
    fn start_fails_on_unknown_seat() {
        let context = MockContext::new(MockGate::new());

        let err = KeyTracer::start(context, "seat9", JsonEmitter::new(Vec::new()), MIN_INTERVAL)
            .err()
            .unwrap();

        assert!(matches!(err, TypeTraceError::SeatAssignmentFailed { .. }));
    }

    #[test]
    fn dropping_the_tracer_closes_devices() {
        let gate = MockGate::new();
        let context = MockContext::new(gate.clone())
            .with_seats(&["seat0"])
            .with_device("/dev/null");

        let tracer = KeyTracer::start(context, "seat0", JsonEmitter::new(Vec::new()), MIN_INTERVAL);
        assert!(tracer.is_ok());
        assert_eq!(gate.opened(), 1);
        drop(tracer);
        assert_eq!(gate.closed(), 1);
    }

    #[test]
    fn emission_failure_releases_the_failed_event() {
        struct Closed;

        impl KeyEventSink for Closed {
            fn handle_key(&mut self, _: &crate::KeyEvent) -> TypeTraceResult<()> {
                Err(TypeTraceError::EmissionFailed(io::ErrorKind::BrokenPipe.into()))
            }
        }

        let context = MockContext::new(MockGate::new()).then_events(vec![press(30), press(31)]);
        let ledger = context.ledger();
        let mut tracer = KeyTracer::start(context, "seat0", Closed, MIN_INTERVAL).unwrap();

        let err = tracer.handle_events().unwrap_err();

        assert!(matches!(err, TypeTraceError::EmissionFailed(_)));
        assert_eq!(ledger.popped(), 1);
        assert_eq!(ledger.released(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_shutdown_is_triggered() {
        let shutdown = Shutdown::new();
        let context = MockContext::new(MockGate::new())
            .then_events(vec![press(30)])
            .then_events(vec![])
            .then_events(vec![press(31)])
            .shutdown_when_drained(&shutdown);
        let ledger = context.ledger();
        let mut emitter = JsonEmitter::new(Vec::new());

        let tracer = KeyTracer::start(context, "seat0", &mut emitter, MIN_INTERVAL).unwrap();
        tracer.run(&shutdown).await.unwrap();

        // three scripted dispatches plus the one that drains the script
        assert_eq!(ledger.dispatches(), 4);
        assert_eq!(lines(&emitter).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn iterations_are_paced_by_the_interval() {
        let shutdown = Shutdown::new();
        let context = MockContext::new(MockGate::new())
            .then_events(vec![])
            .then_events(vec![])
            .then_events(vec![])
            .shutdown_when_drained(&shutdown);
        let tracer = KeyTracer::start(
            context,
            "seat0",
            JsonEmitter::new(Vec::new()),
            Duration::from_millis(250),
        )
        .unwrap();

        let started = time::Instant::now();
        tracer.run(&shutdown).await.unwrap();

        // the first tick completes immediately, the following three wait
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(750), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn trace_maps_failures_to_exit_statuses() {
        let config = Config::default();
        let shutdown = Shutdown::new();

        let discovery: TypeTraceResult<MockContext> =
            Err(TypeTraceError::DiscoveryFailed(io::ErrorKind::NotFound.into()));
        let source_init = Ok(MockContext::new(MockGate::new()).failing_source_init());
        let seat = Ok(MockContext::new(MockGate::new()).with_seats(&["seat1"]));
        let dispatch = Ok(MockContext::new(MockGate::new()).then_failure(io::ErrorKind::Other));

        let sink = || JsonEmitter::new(Vec::new());
        assert_eq!(
            trace(discovery, &config, sink(), &shutdown).await,
            ExitStatus::UdevFailed
        );
        assert_eq!(
            trace(source_init, &config, sink(), &shutdown).await,
            ExitStatus::LibinputFailed
        );
        assert_eq!(
            trace(seat, &config, sink(), &shutdown).await,
            ExitStatus::SeatFailed
        );
        assert_eq!(
            trace(dispatch, &config, sink(), &shutdown).await,
            ExitStatus::LibinputFailed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn trace_returns_no_error_on_shutdown() {
        let config = Config::default();
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let context = Ok(MockContext::new(MockGate::new()));
        let status = trace(context, &config, JsonEmitter::new(Vec::new()), &shutdown).await;

        assert_eq!(status, ExitStatus::NoError);
    }
}
