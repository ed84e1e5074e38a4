//! Blocking client for a spawned run loop.
//!
//! The client is the single reader of the results channel, so every method
//! that waits for a response takes `&mut self`. Systems under test that only
//! need to report events get an [`EventProducer`] instead.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::diagnostics::PartialMatch;
use crate::error::{ExecutionError, ExpectationError, TesError, TesResult, ValidationError};
use crate::event::{Event, EventFields, Lookup, NewEvent, EVENT_SOURCE_KEY, EVENT_TYPE_KEY};
use crate::expectation::Expectation;
use crate::protocol::{Command, Response};
use crate::report::{self, LogOptions};
use crate::runtime::{self, LoopExit, RunLoopConfig, RunLoopHandle};
use crate::storage::AuditEntry;
use crate::value::Value;

/// Fields whose expectations form the partial filter for extended debugging.
const PARTIAL_FILTER_FIELDS: [&str; 2] = [EVENT_SOURCE_KEY, EVENT_TYPE_KEY];

/// Floor for the pause between polls.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

type FailureHook = dyn Fn(&mut EventStoreClient) -> TesResult<()> + Send + Sync;

/// Runs when `get_event` / `expect_event` give up on an event, before the
/// error is returned.
///
/// The default logs the active store. An error from the hook replaces the
/// not-found error.
#[derive(Clone)]
pub struct OnFailure(Arc<FailureHook>);

impl OnFailure {
    /// Wraps a custom hook.
    #[must_use]
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&mut EventStoreClient) -> TesResult<()> + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    /// Logs the active store with default [`LogOptions`].
    #[must_use]
    pub fn log_event_store() -> Self {
        Self::new(|client| client.log_event_store(&LogOptions::default()).map(drop))
    }

    /// Does nothing.
    #[must_use]
    pub fn nothing() -> Self {
        Self::new(|_| Ok(()))
    }

    fn call(&self, client: &mut EventStoreClient) -> TesResult<()> {
        (self.0)(client)
    }
}

impl Default for OnFailure {
    fn default() -> Self {
        Self::log_event_store()
    }
}

impl fmt::Debug for OnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnFailure(..)")
    }
}

/// Client-side defaults.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for any single response.
    pub request_timeout: Duration,
    /// Sleep between polls of the store.
    pub poll_interval: Duration,
    /// How long `get_event` / `expect_event` keep polling.
    pub maximum_poll_time: Duration,
    /// How long `dont_expect_event` keeps polling.
    pub unexpected_event_maximum_poll_time: Duration,
    /// Use the extended lookup and report near misses on failure.
    pub extended_debug_on_failure: bool,
    /// Candidate events shown in an extended failure message.
    pub maximum_events_to_output: usize,
    /// Failed expectations shown per candidate event.
    pub maximum_expectations_per_event_to_output: usize,
    /// Runs when an expected event is not found.
    pub on_failure: OnFailure,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            maximum_poll_time: Duration::from_secs(5),
            unexpected_event_maximum_poll_time: Duration::from_secs(5),
            extended_debug_on_failure: false,
            maximum_events_to_output: 5,
            maximum_expectations_per_event_to_output: 5,
            on_failure: OnFailure::default(),
        }
    }
}

/// Per-call overrides of [`ClientConfig`]. `None` keeps the configured value.
#[derive(Debug, Clone, Default)]
pub struct ExpectOptions {
    /// Overrides the poll time of the called helper.
    pub maximum_poll_time: Option<Duration>,
    /// Overrides the pause between polls. Zero keeps the configured interval.
    pub poll_interval: Option<Duration>,
    /// Overrides `extended_debug_on_failure`.
    pub extended_debug: Option<bool>,
    /// Overrides `maximum_events_to_output`.
    pub maximum_events_to_output: Option<usize>,
    /// Overrides `maximum_expectations_per_event_to_output`.
    pub maximum_expectations_per_event_to_output: Option<usize>,
    /// Overrides the configured failure hook.
    pub on_failure: Option<OnFailure>,
}

impl ExpectOptions {
    /// Poll for at most `maximum_poll_time`.
    #[must_use]
    pub const fn within(mut self, maximum_poll_time: Duration) -> Self {
        self.maximum_poll_time = Some(maximum_poll_time);
        self
    }

    /// Pause `poll_interval` between polls.
    #[must_use]
    pub const fn every(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    /// Turn extended debugging on or off for this call.
    #[must_use]
    pub const fn extended_debug(mut self, enabled: bool) -> Self {
        self.extended_debug = Some(enabled);
        self
    }

    /// Caps how much of an extended failure ends up in the error message.
    #[must_use]
    pub const fn output_caps(mut self, events: usize, expectations_per_event: usize) -> Self {
        self.maximum_events_to_output = Some(events);
        self.maximum_expectations_per_event_to_output = Some(expectations_per_event);
        self
    }

    /// Run `hook` instead of the configured one if this call fails.
    #[must_use]
    pub fn on_failure(mut self, hook: OnFailure) -> Self {
        self.on_failure = Some(hook);
        self
    }
}

/// Fire-and-forget access to the store for producers.
#[derive(Debug, Clone)]
pub struct EventProducer {
    commands: Sender<Command>,
}

impl EventProducer {
    /// Appends an event.
    pub fn add_event(&self, fields: impl Into<EventFields>) -> TesResult<()> {
        self.commands
            .send(Command::AddEvent {
                event: fields.into(),
            })
            .map_err(|_| {
                ExecutionError::Disconnected {
                    context: "add_event".to_string(),
                }
                .into()
            })
    }

    /// Appends an event with the given source and type.
    pub fn add_test_event(
        &self,
        source: impl Into<String>,
        event_type: impl Into<Value>,
        fields: EventFields,
    ) -> TesResult<()> {
        self.add_event(NewEvent::new(source, event_type).fields(fields))
    }
}

/// Owner of a run loop and the reader of its results.
pub struct EventStoreClient {
    run_loop: RunLoopHandle,
    producer: EventProducer,
    config: ClientConfig,
    /// Responses owed by the loop, including those of timed out requests.
    outstanding: usize,
}

impl EventStoreClient {
    /// Spawns a run loop and wraps it.
    pub fn start(config: ClientConfig, run_loop: &RunLoopConfig) -> TesResult<Self> {
        Ok(Self::new(runtime::spawn(run_loop)?, config))
    }

    /// Spawns a run loop with default settings.
    pub fn with_defaults() -> TesResult<Self> {
        Self::start(ClientConfig::default(), &RunLoopConfig::default())
    }

    /// Wraps an already spawned run loop.
    #[must_use]
    pub fn new(run_loop: RunLoopHandle, config: ClientConfig) -> Self {
        let producer = EventProducer {
            commands: run_loop.sender(),
        };
        Self {
            run_loop,
            producer,
            config,
            outstanding: 0,
        }
    }

    /// The configuration this client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A cloneable producer for the system under test.
    #[must_use]
    pub fn producer(&self) -> EventProducer {
        self.producer.clone()
    }

    /// Appends an event.
    pub fn add_event(&self, fields: impl Into<EventFields>) -> TesResult<()> {
        self.producer.add_event(fields)
    }

    /// Appends an event with the given source and type.
    pub fn add_test_event(
        &self,
        source: impl Into<String>,
        event_type: impl Into<Value>,
        fields: EventFields,
    ) -> TesResult<()> {
        self.producer.add_test_event(source, event_type, fields)
    }

    /// Decodes a JSON command frame, submits it and returns its response, if any.
    pub fn submit_json(&mut self, frame: &str) -> TesResult<Option<Response>> {
        let command = Command::from_json(frame)?;
        if command.expects_response() {
            self.request(command).map(Some)
        } else {
            self.run_loop.send(command)?;
            Ok(None)
        }
    }

    /// Every active event, oldest first.
    pub fn get_all_events(&mut self) -> TesResult<Vec<Event>> {
        match self.request(Command::GetAllEvents)? {
            Response::Events { events } => Ok(events),
            other => Err(unexpected("get_all_events", &other)),
        }
    }

    /// The audit log: every event ever added, with its lifecycle state.
    pub fn get_full_event_log(&mut self) -> TesResult<Vec<AuditEntry>> {
        match self.request(Command::GetFullEventLog)? {
            Response::EventLog { entries } => Ok(entries),
            other => Err(unexpected("get_full_event_log", &other)),
        }
    }

    /// Every active event satisfying all expectations.
    pub fn get_all_matching_events(&mut self, expectations: &[Expectation]) -> TesResult<Vec<Event>> {
        check_expectations(expectations)?;
        match self.request(Command::GetAllMatchingEvents {
            expectations: expectations.to_vec(),
        })? {
            Response::Events { events } => Ok(events),
            other => Err(unexpected("get_all_matching_events", &other)),
        }
    }

    /// Removes every active event satisfying all expectations; returns how many.
    pub fn delete_all_matching_events(&mut self, expectations: &[Expectation]) -> TesResult<usize> {
        check_expectations(expectations)?;
        match self.request(Command::DeleteMatchingEvents {
            expectations: expectations.to_vec(),
        })? {
            Response::Count { removed } => Ok(removed),
            other => Err(unexpected("delete_all_matching_events", &other)),
        }
    }

    /// Polls for the oldest event satisfying all expectations without
    /// removing it.
    ///
    /// The store is queried at least once, even with a zero poll time. With
    /// extended debugging, expectations on `event_source` and `event_type`
    /// select the candidates whose failures are reported.
    pub fn get_event(&mut self, expectations: &[Expectation], options: &ExpectOptions) -> TesResult<Event> {
        check_expectations(expectations)?;

        let poll_interval = self.poll_interval_for(options);
        let deadline = Instant::now() + options.maximum_poll_time.unwrap_or(self.config.maximum_poll_time);
        let extended = options
            .extended_debug
            .unwrap_or(self.config.extended_debug_on_failure);

        if extended {
            let partial_filter: Vec<Expectation> = expectations
                .iter()
                .filter(|e| PARTIAL_FILTER_FIELDS.contains(&e.field_name.as_str()))
                .cloned()
                .collect();
            if !partial_filter.is_empty() {
                return self.poll_extended(expectations, partial_filter, poll_interval, deadline, options);
            }
            warn!(
                "No expectations provided for either of the partial filter fields: {EVENT_SOURCE_KEY} and {EVENT_TYPE_KEY}, no extended debug will be provided"
            );
        }

        loop {
            let result = match self.request(Command::ExpectEvent {
                expectations: expectations.to_vec(),
            })? {
                Response::Lookup { result } => result,
                other => return Err(unexpected("expect_event", &other)),
            };
            if let Lookup::Found(event) = result {
                return Ok(event);
            }
            if !sleep_until_next_poll(poll_interval, deadline) {
                break;
            }
        }

        self.on_failure(options)?;
        Err(ExpectationError::EventNotFound {
            expectations: expectations.to_vec(),
        }
        .into())
    }

    fn poll_extended(
        &mut self,
        expectations: &[Expectation],
        partial_filter: Vec<Expectation>,
        poll_interval: Duration,
        deadline: Instant,
        options: &ExpectOptions,
    ) -> TesResult<Event> {
        let mut partial_matches: Vec<PartialMatch>;
        loop {
            let result = match self.request(Command::ExpectEventExtendedDebug {
                expectations: expectations.to_vec(),
                partial_filter: partial_filter.clone(),
            })? {
                Response::ExtendedLookup { result } => result,
                other => return Err(unexpected("expect_event_extended_debug", &other)),
            };
            if let Lookup::Found(event) = result.event {
                return Ok(event);
            }
            partial_matches = result.partial_matches;
            if !sleep_until_next_poll(poll_interval, deadline) {
                break;
            }
        }

        partial_matches.sort_by_key(|p| p.event.id());
        if !partial_matches.is_empty() {
            report::log_extended_debug(&report::extended_debug_lines(&partial_matches));
        }
        self.on_failure(options)?;

        Err(ExpectationError::ExtendedEventNotFound {
            expectations: expectations.to_vec(),
            partial_matches,
            maximum_events_to_output: options
                .maximum_events_to_output
                .unwrap_or(self.config.maximum_events_to_output),
            maximum_expectations_per_event_to_output: options
                .maximum_expectations_per_event_to_output
                .unwrap_or(self.config.maximum_expectations_per_event_to_output),
        }
        .into())
    }

    /// [`get_event`](Self::get_event), then removes the found event and marks
    /// it `Expected`.
    pub fn expect_event(&mut self, expectations: &[Expectation], options: &ExpectOptions) -> TesResult<Event> {
        let event = self.get_event(expectations, options)?;
        self.run_loop.send(Command::RemoveExpectedEvent { event: event.clone() })?;
        Ok(event)
    }

    /// Polls for the unexpected-event poll time and fails if a matching event
    /// shows up.
    pub fn dont_expect_event(&mut self, expectations: &[Expectation], options: &ExpectOptions) -> TesResult<()> {
        check_expectations(expectations)?;

        let poll_interval = self.poll_interval_for(options);
        let deadline = Instant::now()
            + options
                .maximum_poll_time
                .unwrap_or(self.config.unexpected_event_maximum_poll_time);

        loop {
            let result = match self.request(Command::ExpectEvent {
                expectations: expectations.to_vec(),
            })? {
                Response::Lookup { result } => result,
                other => return Err(unexpected("expect_event", &other)),
            };
            if let Lookup::Found(event) = result {
                return Err(ExpectationError::UnexpectedEventFound {
                    expectations: expectations.to_vec(),
                    event: Box::new(event),
                }
                .into());
            }
            if !sleep_until_next_poll(poll_interval, deadline) {
                return Ok(());
            }
        }
    }

    /// Logs the active store at `info` and returns the logged lines.
    pub fn log_event_store(&mut self, options: &LogOptions) -> TesResult<Vec<String>> {
        let events = self.get_all_events()?;
        let lines = report::event_store_lines(&events, options);
        report::log_event_store(&lines);
        Ok(lines)
    }

    /// Logs the audit log at `info` and returns the logged lines.
    pub fn log_full_event_store(&mut self, options: &LogOptions) -> TesResult<Vec<String>> {
        let entries = self.get_full_event_log()?;
        let lines = report::full_event_log_lines(&entries, options);
        report::log_event_store(&lines);
        Ok(lines)
    }

    /// Clears both stores and restarts ids at 0.
    pub fn reset(&mut self) -> TesResult<()> {
        match self.request(Command::Reset)? {
            Response::Ack { .. } => Ok(()),
            other => Err(unexpected("reset", &other)),
        }
    }

    /// Stops the run loop and waits for it to exit.
    pub fn shutdown(self) -> TesResult<LoopExit> {
        let Self { run_loop, producer, .. } = self;
        drop(producer);
        run_loop.send(Command::Shutdown)?;
        run_loop.join()
    }

    fn on_failure(&mut self, options: &ExpectOptions) -> TesResult<()> {
        let hook = options
            .on_failure
            .clone()
            .unwrap_or_else(|| self.config.on_failure.clone());
        hook.call(self)
    }

    fn poll_interval_for(&self, options: &ExpectOptions) -> Duration {
        options
            .poll_interval
            .filter(|interval| !interval.is_zero())
            .unwrap_or(self.config.poll_interval)
            .max(MIN_POLL_INTERVAL)
    }

    /// Sends `command` and waits for its response.
    ///
    /// The loop answers in queue order, one response per response-bearing
    /// command, so answers to requests that already timed out arrive first
    /// and are skipped by count.
    fn request(&mut self, command: Command) -> TesResult<Response> {
        let context = command.name();
        self.run_loop.send(command)?;
        self.outstanding += 1;

        let timeout = self.config.request_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.run_loop.results().recv_timeout(remaining) {
                Ok(response) => {
                    self.outstanding = self.outstanding.saturating_sub(1);
                    if self.outstanding == 0 {
                        return Ok(response);
                    }
                    debug!(context, late = response.name(), "discarded response to a timed out request");
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        context,
                        "No message received from event store, the request_timeout may need increasing"
                    );
                    return Err(ExecutionError::Timeout {
                        context: context.to_string(),
                        duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                    .into());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ExecutionError::Disconnected {
                        context: context.to_string(),
                    }
                    .into());
                }
            }
        }
    }
}

fn check_expectations(expectations: &[Expectation]) -> TesResult<()> {
    if expectations.is_empty() {
        return Err(ValidationError::EmptyExpectations.into());
    }
    Ok(())
}

fn unexpected(context: &str, response: &Response) -> TesError {
    ExecutionError::UnexpectedResponse {
        context: context.to_string(),
        actual: response.name().to_string(),
    }
    .into()
}

/// Sleeps until the next poll is due. Returns false once the deadline has passed.
fn sleep_until_next_poll(poll_interval: Duration, deadline: Instant) -> bool {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return false;
    }
    thread::sleep(poll_interval.min(remaining));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RunLoop;

    fn quick() -> ExpectOptions {
        ExpectOptions::default()
            .within(Duration::from_millis(50))
            .every(Duration::from_millis(10))
    }

    fn client() -> EventStoreClient {
        EventStoreClient::start(
            ClientConfig {
                request_timeout: Duration::from_secs(5),
                on_failure: OnFailure::nothing(),
                ..ClientConfig::default()
            },
            &RunLoopConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.maximum_poll_time, Duration::from_secs(5));
        assert_eq!(config.unexpected_event_maximum_poll_time, Duration::from_secs(5));
        assert!(!config.extended_debug_on_failure);
        assert_eq!(config.maximum_events_to_output, 5);
        assert_eq!(config.maximum_expectations_per_event_to_output, 5);
    }

    #[test]
    fn empty_expectations_are_rejected_before_sending() {
        let mut client = client();
        assert!(client.get_all_matching_events(&[]).unwrap_err().is_validation());
        assert!(client.delete_all_matching_events(&[]).unwrap_err().is_validation());
        assert!(client.get_event(&[], &quick()).unwrap_err().is_validation());
        assert!(client.dont_expect_event(&[], &quick()).unwrap_err().is_validation());
        assert!(client.get_full_event_log().unwrap().is_empty());
    }

    #[test]
    fn sleep_until_next_poll_respects_deadline() {
        assert!(!sleep_until_next_poll(Duration::from_millis(1), Instant::now()));
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(sleep_until_next_poll(Duration::from_secs(10), deadline));
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn zero_poll_time_still_queries_once() {
        let mut client = client();
        client
            .add_test_event("svc", "ready", EventFields::new())
            .unwrap();
        let event = client
            .get_event(
                &[Expectation::eq("event_type", "ready")],
                &ExpectOptions::default().within(Duration::ZERO),
            )
            .unwrap();
        assert_eq!(event.source(), Some("svc"));
    }

    #[test]
    fn extended_debug_without_partial_filter_falls_back() {
        let mut client = client();
        let err = client
            .get_event(&[Expectation::eq("status", "ok")], &quick().extended_debug(true))
            .unwrap_err();
        assert!(err.is_event_not_found());
        assert!(err.partial_matches().is_none());
    }

    #[test]
    fn zero_poll_interval_keeps_the_configured_one() {
        let client = client();
        let configured = client.config().poll_interval;
        assert_eq!(client.poll_interval_for(&ExpectOptions::default().every(Duration::ZERO)), configured);
        assert_eq!(client.poll_interval_for(&ExpectOptions::default()), configured);
        assert_eq!(client.poll_interval_for(&quick()), Duration::from_millis(10));

        let spinning = EventStoreClient::start(
            ClientConfig {
                poll_interval: Duration::ZERO,
                on_failure: OnFailure::nothing(),
                ..ClientConfig::default()
            },
            &RunLoopConfig::default(),
        )
        .unwrap();
        assert_eq!(spinning.poll_interval_for(&ExpectOptions::default()), MIN_POLL_INTERVAL);
    }

    #[test]
    fn late_response_is_not_taken_for_the_next_reply() {
        let run_loop = RunLoop::new().with_delay("get_all_events", Duration::from_millis(300));
        let handle = runtime::spawn_loop(run_loop, &RunLoopConfig::default()).unwrap();
        let mut client = EventStoreClient::new(
            handle,
            ClientConfig {
                request_timeout: Duration::from_millis(50),
                on_failure: OnFailure::nothing(),
                ..ClientConfig::default()
            },
        );
        client.add_event(NewEvent::new("svc", "ready")).unwrap();

        assert!(client.get_all_events().unwrap_err().is_timeout());

        // The events answer is still in flight when the next request goes out.
        client.config.request_timeout = Duration::from_secs(5);
        let log = client.get_full_event_log().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(client.get_all_events().unwrap().len(), 1);
    }

    #[test]
    fn submit_json_round_trip() {
        let mut client = client();
        let none = client
            .submit_json(r#"{"type": "add_event", "event": {"event_source": "web", "event_type": "hit"}}"#)
            .unwrap();
        assert!(none.is_none());

        let Some(Response::Events { events }) = client.submit_json(r#"{"type": "get_all_events"}"#).unwrap() else {
            panic!("expected events");
        };
        assert_eq!(events.len(), 1);
        assert!(client.submit_json(r#"{"type": "explode"}"#).unwrap().is_none());
        assert!(client.submit_json("not json").unwrap_err().is_validation());
    }

    #[test]
    fn requests_after_shutdown_are_disconnected() {
        let client = client();
        let producer = client.producer();
        assert_eq!(client.shutdown().unwrap(), LoopExit::Shutdown);
        assert!(producer.add_event(NewEvent::new("a", "b")).unwrap_err().is_disconnected());
    }
}
