//! Human-readable rendering of store contents and diagnostics.
//!
//! Lines list `event_source`, `event_state` and `event_type` first, since those
//! are what a reader scans for when an expectation is slightly off, followed by
//! the remaining fields sorted by name.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt::Write as _;

use tracing::{error, info};

use crate::comparator::compare;
use crate::diagnostics::PartialMatch;
use crate::event::{Event, EVENT_ID_KEY, EVENT_SOURCE_KEY, EVENT_STATE_KEY, EVENT_TYPE_KEY};
use crate::expectation::Expectation;
use crate::storage::{AuditEntry, LifecycleState};
use crate::value::Value;

const LEADING_FIELDS: [&str; 3] = [EVENT_SOURCE_KEY, EVENT_STATE_KEY, EVENT_TYPE_KEY];

/// Controls which events and fields are logged, and in which order.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Field to order by; ties are broken by event id.
    pub order_by: String,
    /// Ordering value for events lacking `order_by`.
    pub order_by_default: Value,
    /// Only these fields are logged. Takes precedence over `fields_to_exclude`.
    pub fields_to_log: Option<Vec<String>>,
    /// These fields are dropped. Required fields cannot be excluded.
    pub fields_to_exclude: Option<Vec<String>>,
    /// Only events matching all of these are logged.
    pub filters: Vec<Expectation>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            order_by: EVENT_ID_KEY.to_string(),
            order_by_default: Value::Null,
            fields_to_log: None,
            fields_to_exclude: None,
            filters: Vec::new(),
        }
    }
}

impl LogOptions {
    /// Order events by `field` instead of by id.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = field.into();
        self
    }

    /// Sort key for events that lack the `order_by` field.
    #[must_use]
    pub fn order_by_default(mut self, value: impl Into<Value>) -> Self {
        self.order_by_default = value.into();
        self
    }

    /// Log only these fields.
    #[must_use]
    pub fn fields_to_log<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields_to_log = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Leave these fields out.
    #[must_use]
    pub fn fields_to_exclude<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields_to_exclude = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Log only events meeting `expectation`, in addition to earlier filters.
    #[must_use]
    pub fn filter(mut self, expectation: Expectation) -> Self {
        self.filters.push(expectation);
        self
    }
}

struct Row<'a> {
    event: &'a Event,
    state: Option<LifecycleState>,
}

impl Row<'_> {
    fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
        if name == EVENT_STATE_KEY {
            return self.state.map(|s| Cow::Owned(Value::from(s.as_str())));
        }
        self.event.field(name)
    }

    fn matches(&self, filters: &[Expectation]) -> bool {
        filters.iter().all(|f| {
            self.field(&f.field_name)
                .is_some_and(|observed| compare(f.operator, &observed, &f.value).is_match())
        })
    }
}

/// Renders one event as `event_id: N, {field: value, ...}`.
#[must_use]
pub fn render_event_line(event: &Event, state: Option<LifecycleState>) -> String {
    render_row(&Row { event, state }, &|_: &str| true)
}

fn render_row(row: &Row<'_>, keep: &dyn Fn(&str) -> bool) -> String {
    let mut ordered: Vec<(&str, Cow<'_, Value>)> = Vec::new();
    for key in LEADING_FIELDS {
        if keep(key) {
            if let Some(value) = row.field(key) {
                ordered.push((key, value));
            }
        }
    }
    for (key, value) in row.event.fields() {
        if LEADING_FIELDS.contains(&key.as_str()) || !keep(key) {
            continue;
        }
        ordered.push((key, Cow::Borrowed(value)));
    }

    let mut line = format!("{EVENT_ID_KEY}: {}, {{", row.event.id());
    for (idx, (key, value)) in ordered.iter().enumerate() {
        if idx > 0 {
            line.push_str(", ");
        }
        let _ = write!(line, "{key}: {value}");
    }
    line.push('}');
    line
}

fn render_rows(mut rows: Vec<Row<'_>>, options: &LogOptions, required: &[&str]) -> Vec<String> {
    if options.fields_to_log.is_some() && options.fields_to_exclude.is_some() {
        error!("fields_to_log and fields_to_exclude have been provided. fields_to_exclude will be ignored");
    }

    if !options.filters.is_empty() {
        rows.retain(|row| row.matches(&options.filters));
    }

    if options.order_by == EVENT_ID_KEY {
        rows.sort_by_key(|row| row.event.id());
    } else {
        rows.sort_by(|a, b| {
            let av = a.field(&options.order_by);
            let bv = b.field(&options.order_by);
            let av = av.as_deref().unwrap_or(&options.order_by_default);
            let bv = bv.as_deref().unwrap_or(&options.order_by_default);
            match av.sort_cmp(bv) {
                Ordering::Equal => a.event.id().cmp(&b.event.id()),
                other => other,
            }
        });
    }

    let keep = |key: &str| -> bool {
        if required.contains(&key) {
            return true;
        }
        if let Some(fields) = &options.fields_to_log {
            return fields.iter().any(|f| f == key);
        }
        if let Some(excluded) = &options.fields_to_exclude {
            return !excluded.iter().any(|f| f == key);
        }
        true
    };

    rows.iter().map(|row| render_row(row, &keep)).collect()
}

/// Lines describing active events.
#[must_use]
pub fn event_store_lines(events: &[Event], options: &LogOptions) -> Vec<String> {
    let rows = events.iter().map(|event| Row { event, state: None }).collect();
    render_rows(rows, options, &[EVENT_ID_KEY])
}

/// Lines describing the full history; `event_state` is always shown.
#[must_use]
pub fn full_event_log_lines(entries: &[AuditEntry], options: &LogOptions) -> Vec<String> {
    let rows = entries
        .iter()
        .map(|entry| Row {
            event: entry.event(),
            state: Some(entry.state()),
        })
        .collect();
    render_rows(rows, options, &[EVENT_ID_KEY, EVENT_STATE_KEY])
}

/// Lines describing partial matches, ordered by event id, each followed by its
/// indented failures.
#[must_use]
pub fn extended_debug_lines(partial_matches: &[PartialMatch]) -> Vec<String> {
    let mut sorted: Vec<&PartialMatch> = partial_matches.iter().collect();
    sorted.sort_by_key(|p| p.event.id());

    let mut lines = Vec::new();
    for partial in sorted {
        lines.push(render_event_line(&partial.event, None));
        for failure in &partial.failures {
            lines.push(format!("    {failure}"));
        }
    }
    lines
}

pub(crate) fn log_event_store(lines: &[String]) {
    info!("***** Logging Event Store *****");
    for line in lines {
        info!("{line}");
    }
    info!("***** End Of Event Store *****");
}

pub(crate) fn log_extended_debug(lines: &[String]) {
    info!("***** Logging Extended Expectation Failure Debug *****");
    for line in lines {
        info!("{line}");
    }
    info!("***** End Of Extended Expectation Failure Debug *****");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventId, NewEvent};
    use crate::storage::ActiveStore;

    fn store() -> ActiveStore {
        let mut store = ActiveStore::new();
        store.add(NewEvent::new("mailer", "email_sent").field("to", "b@x.com").field("size", 20).build());
        store.add(NewEvent::new("monitor", "heartbeat").field("size", 10).build());
        store.add(NewEvent::new("mailer", "email_sent").field("to", "a@x.com").build());
        store
    }

    #[test]
    fn line_puts_leading_fields_first() {
        let event = Event::new(
            EventId::new(7),
            NewEvent::new("mailer", "email_sent").field("attempt", 1).field("zz", true).build(),
        );
        assert_eq!(
            render_event_line(&event, Some(LifecycleState::Expected)),
            "event_id: 7, {event_source: \"mailer\", event_state: \"Expected\", event_type: \"email_sent\", attempt: 1, zz: true}"
        );
    }

    #[test]
    fn default_options_order_by_id() {
        let store = store();
        let lines = event_store_lines(&store.get_all(), &LogOptions::default());
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("event_id: 0"));
        assert!(lines[2].starts_with("event_id: 2"));
    }

    #[test]
    fn order_by_field_puts_missing_values_first() {
        let store = store();
        let lines = event_store_lines(&store.get_all(), &LogOptions::default().order_by("size"));
        let ids: Vec<&str> = lines.iter().map(|l| &l[..11]).collect();
        assert_eq!(ids, vec!["event_id: 2", "event_id: 1", "event_id: 0"]);
    }

    #[test]
    fn filters_and_field_selection() {
        let store = store();
        let options = LogOptions::default()
            .filter(Expectation::eq("event_type", "email_sent"))
            .fields_to_log(["to"]);
        let lines = event_store_lines(&store.get_all(), &options);
        assert_eq!(lines, vec!["event_id: 0, {to: \"b@x.com\"}", "event_id: 2, {to: \"a@x.com\"}"]);
    }

    #[test]
    fn exclusion_cannot_drop_required_fields() {
        let mut store = store();
        store.remove_matching_events(&[Expectation::eq("event_type", "heartbeat")]);
        let options = LogOptions::default()
            .filter(Expectation::eq("event_state", "Deleted"))
            .fields_to_exclude(["event_state", "event_source", "size"]);
        let lines = full_event_log_lines(&store.full_event_log(), &options);
        assert_eq!(
            lines,
            vec!["event_id: 1, {event_state: \"Deleted\", event_type: \"heartbeat\"}"]
        );
    }

    #[test]
    fn fields_to_log_wins_over_exclusion() {
        let store = store();
        let options = LogOptions::default().fields_to_log(["to"]).fields_to_exclude(["to"]);
        let lines = event_store_lines(&store.get_all(), &options);
        assert_eq!(lines[0], "event_id: 0, {to: \"b@x.com\"}");
    }

    #[test]
    fn extended_lines_are_sorted_and_indented() {
        let mut store = ActiveStore::new();
        store.add(NewEvent::new("svc", "done").field("status", "failed").build());
        store.add(NewEvent::new("svc", "done").build());
        let mut result = store.extended_expect_event(
            &[Expectation::eq("status", "ok")],
            &[Expectation::eq("event_type", "done")],
        );
        result.partial_matches.reverse();

        let lines = extended_debug_lines(&result.partial_matches);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("event_id: 0"));
        assert_eq!(lines[1], "    expected status == \"ok\", observed \"failed\"");
        assert!(lines[2].starts_with("event_id: 1"));
        assert_eq!(lines[3], "    field 'status' not found (expected status == \"ok\")");
    }
}
