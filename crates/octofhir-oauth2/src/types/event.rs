//! Domain events and the event-sourced aggregate contract.
//!
//! Events are the only source of truth for aggregate state. Mutators never
//! change an aggregate in place: they record an event, apply it to a clone and
//! hand back `(clone, events)`. Replaying the stored history through
//! [`Aggregate::replay`] rebuilds the same value.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;

/// A recorded fact about one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Identifier of the aggregate the event belongs to.
    pub domain_id: String,
    /// When the event was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_on: OffsetDateTime,
    /// What happened.
    pub payload: P,
}

impl<P> Event<P> {
    /// Records a new event for `domain_id` at the current time.
    #[must_use]
    pub fn record(domain_id: impl Into<String>, payload: P) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            domain_id: domain_id.into(),
            recorded_on: OffsetDateTime::now_utc(),
            payload,
        }
    }
}

/// An event-sourced domain aggregate.
///
/// `apply_payload` must be a pure, exhaustive reducer over the aggregate's
/// closed event enum: the same history always yields the same state.
pub trait Aggregate: Sized + Clone {
    /// The closed set of events this aggregate understands.
    type Payload: Clone;

    /// The zero-value aggregate that replay starts from.
    fn create_empty() -> Self;

    /// The aggregate identifier, empty before the creation event is applied.
    fn domain_id(&self) -> &str;

    /// Applies one event payload.
    fn apply_payload(self, payload: &Self::Payload) -> Self;

    /// Applies a recorded event.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UnsupportedEvent` if the event was recorded for a
    /// different aggregate.
    fn apply(self, event: &Event<Self::Payload>) -> AuthResult<Self> {
        let current = self.domain_id();
        if !current.is_empty() && current != event.domain_id {
            return Err(AuthError::unsupported_event(format!(
                "event {} belongs to \"{}\", not \"{}\"",
                event.event_id, event.domain_id, current
            )));
        }
        Ok(self.apply_payload(&event.payload))
    }

    /// Rebuilds an aggregate from its ordered history.
    ///
    /// # Errors
    ///
    /// Propagates `apply` errors.
    fn replay<'a, I>(events: I) -> AuthResult<Self>
    where
        I: IntoIterator<Item = &'a Event<Self::Payload>>,
        Self::Payload: 'a,
    {
        events
            .into_iter()
            .try_fold(Self::create_empty(), |state, event| state.apply(event))
    }

    /// Records `payload` for this aggregate and returns the updated clone.
    fn record(&self, domain_id: &str, payload: Self::Payload) -> (Self, Vec<Event<Self::Payload>>) {
        let next = self.clone().apply_payload(&payload);
        (next, vec![Event::record(domain_id, payload)])
    }
}
