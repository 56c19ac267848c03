//! Domain events emitted at the point of decision.
//!
//! Delivery is best-effort: an [`EventSink`] must never block the
//! caller and nothing in the core depends on an event arriving.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum EventKind {
    #[serde(rename = "login.success")]
    LoginSuccess,
    #[serde(rename = "login.failure")]
    LoginFailure,
    #[serde(rename = "mfa.challenge.created")]
    MfaChallengeCreated,
    #[serde(rename = "mfa.challenge.verified")]
    MfaChallengeVerified,
    #[serde(rename = "mfa.challenge.failed")]
    MfaChallengeFailed,
    #[serde(rename = "mfa.reset")]
    MfaReset,
    #[serde(rename = "token.issued")]
    TokenIssued,
    #[serde(rename = "token.revoked")]
    TokenRevoked,
    #[serde(rename = "role.assigned")]
    RoleAssigned,
    #[serde(rename = "role.removed")]
    RoleRemoved,
    #[serde(rename = "permission.created")]
    PermissionCreated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LoginSuccess => "login.success",
            EventKind::LoginFailure => "login.failure",
            EventKind::MfaChallengeCreated => "mfa.challenge.created",
            EventKind::MfaChallengeVerified => "mfa.challenge.verified",
            EventKind::MfaChallengeFailed => "mfa.challenge.failed",
            EventKind::MfaReset => "mfa.reset",
            EventKind::TokenIssued => "token.issued",
            EventKind::TokenRevoked => "token.revoked",
            EventKind::RoleAssigned => "role.assigned",
            EventKind::RoleRemoved => "role.removed",
            EventKind::PermissionCreated => "permission.created",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub tenant_id: Option<Uuid>,
    /// The principal the event is about.
    pub subject_id: Option<Uuid>,
    /// Who caused it, when different from the subject.
    pub actor_id: Option<Uuid>,
    pub detail: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: EventKind, tenant_id: Option<Uuid>, subject_id: Option<Uuid>) -> Self {
        Self {
            kind,
            tenant_id,
            subject_id,
            actor_id: None,
            detail: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Non-blocking event dispatch.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}

/// Writes every event to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: DomainEvent) {
        info!(
            event = event.kind.as_str(),
            tenant_id = ?event.tenant_id,
            subject_id = ?event.subject_id,
            actor_id = ?event.actor_id,
            detail = %event.detail,
            "domain event"
        );
    }
}

/// Hands events to a consumer task over an unbounded channel.
///
/// A closed channel drops the event with a warning.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: DomainEvent) {
        let kind = event.kind;
        if self.tx.send(event).is_err() {
            warn!(event = kind.as_str(), "event consumer gone, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(DomainEvent::new(EventKind::LoginFailure, None, None));
        sink.emit(DomainEvent::new(EventKind::LoginSuccess, None, None));

        assert_eq!(rx.try_recv().unwrap().kind, EventKind::LoginFailure);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::LoginSuccess);
    }

    #[test]
    fn emitting_after_consumer_drop_does_not_panic() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        sink.emit(DomainEvent::new(EventKind::TokenIssued, None, None));
    }

    #[test]
    fn event_names_match_serialized_form() {
        let json = serde_json::to_value(EventKind::MfaChallengeCreated).unwrap();
        assert_eq!(json, EventKind::MfaChallengeCreated.as_str());
    }
}
