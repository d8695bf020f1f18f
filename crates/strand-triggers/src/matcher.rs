//! Event-to-definition matching rules.

use tracing::debug;

use strand_store::{Event, Skill, Trigger, TriggerFilter, Workflow};

// ---------------------------------------------------------------------------
// Triggered
// ---------------------------------------------------------------------------

/// Anything that declares triggers and can be matched against events.
pub trait Triggered {
    fn triggers(&self) -> &[Trigger];
    fn is_enabled(&self) -> bool;
    /// Name used in match logging.
    fn name(&self) -> &str;
}

impl Triggered for Skill {
    fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Triggered for Workflow {
    fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Check whether a single trigger accepts an event.
///
/// Cron triggers never match; event triggers require an exact source
/// match, an event-type match when `event_types` is declared, and a
/// passing payload filter when one is declared.
pub fn trigger_matches(trigger: &Trigger, event: &Event) -> bool {
    if trigger.is_cron() {
        return false;
    }

    if trigger.source != event.source {
        return false;
    }

    if let Some(types) = &trigger.event_types
        && !types.iter().any(|t| t == &event.event_type)
    {
        return false;
    }

    match &trigger.filter {
        Some(filter) => filter_matches(filter, event),
        None => true,
    }
}

/// Evaluate a payload filter.
///
/// A declared constraint whose payload field is missing (or not a
/// string) fails the filter.
fn filter_matches(filter: &TriggerFilter, event: &Event) -> bool {
    if let Some(expected) = &filter.repository {
        match event.payload.get("repository").and_then(|v| v.as_str()) {
            Some(actual) if actual == expected => {}
            _ => return false,
        }
    }

    if !filter.refs.is_empty() {
        match event.payload.get("ref").and_then(|v| v.as_str()) {
            Some(actual) if filter.refs.iter().any(|r| r == actual) => {}
            _ => return false,
        }
    }

    true
}

/// Find every enabled definition with at least one matching trigger.
///
/// Definitions come back in input order, each at most once no matter
/// how many of its triggers match.
pub fn find_matches<'a, T: Triggered>(definitions: &'a [T], event: &Event) -> Vec<&'a T> {
    let matched: Vec<&T> = definitions
        .iter()
        .filter(|d| d.is_enabled())
        .filter(|d| d.triggers().iter().any(|t| trigger_matches(t, event)))
        .collect();

    if !matched.is_empty() {
        debug!(
            event_id = %event.id,
            event_source = %event.source,
            event_type = %event.event_type,
            matched = matched.len(),
            "event matched definitions"
        );
    }
    matched
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
