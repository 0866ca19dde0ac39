use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Responder name recorded when a request settles by expiry rather than by a reviewer.
pub const EXPIRY_RESPONDER: &str = "system";

/// Fallback display name when the messaging identity carries neither a name nor a handle.
pub const UNKNOWN_RESPONDER: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessRequest {
    pub id: String,
    pub requestor_name: String,
    pub login_name: Option<String>,
    pub system_name: String,
    pub access_type: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: RequestStatus,
    pub responder_name: Option<String>,
    pub responder_handle: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub notification_message_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AccessRequest {
    /// True once `now` has reached the fixed expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Declined => "declined",
            RequestStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission payload. Every field is optional at the wire level so that a
/// missing field surfaces as a validation error instead of a JSON rejection.
///
/// Aliases accept the field names used by older submitters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccessRequest {
    #[serde(alias = "request_uuid")]
    pub id: Option<String>,
    #[serde(alias = "requestor_fullname")]
    pub requestor_name: Option<String>,
    #[serde(alias = "login_fullname")]
    pub login_name: Option<String>,
    pub system_name: Option<String>,
    #[serde(alias = "type")]
    pub access_type: Option<String>,
    pub reason: Option<String>,
    #[serde(alias = "timestamp")]
    pub requested_at: Option<DateTime<Utc>>,
}

impl NewAccessRequest {
    /// Validate the submission and build the pending record.
    ///
    /// `expires_at` is derived here exactly once and never recomputed.
    pub fn into_pending(
        self,
        now: DateTime<Utc>,
        expiry_window: Duration,
    ) -> Result<AccessRequest, AppError> {
        let mut missing = Vec::new();
        let id = required(self.id, "id", &mut missing);
        let requestor_name = required(self.requestor_name, "requestor_name", &mut missing);
        let system_name = required(self.system_name, "system_name", &mut missing);
        let access_type = required(self.access_type, "access_type", &mut missing);
        let reason = required(self.reason, "reason", &mut missing);

        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let requested_at = self.requested_at.unwrap_or(now);
        let expires_at = requested_at
            .checked_add_signed(expiry_window)
            .ok_or_else(|| {
                AppError::Validation(format!("requested_at {} is out of range", requested_at))
            })?;
        Ok(AccessRequest {
            id,
            requestor_name,
            login_name: self
                .login_name
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            system_name,
            access_type,
            reason,
            requested_at,
            expires_at,
            status: RequestStatus::Pending,
            responder_name: None,
            responder_handle: None,
            responded_at: None,
            notification_message_ref: None,
            created_at: now,
        })
    }
}

fn required(value: Option<String>, name: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => {
            missing.push(name);
            String::new()
        }
    }
}

/// Reviewer identity as reported by the messaging channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponderIdentity {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl ResponderIdentity {
    /// Identity for operators deciding outside the chat (admin API, CLI).
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            first_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Full name, then `@handle`, then [`UNKNOWN_RESPONDER`]. Fixed order.
    pub fn display_name(&self) -> String {
        let full_name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !full_name.is_empty() {
            return full_name;
        }
        self.handle()
            .unwrap_or_else(|| UNKNOWN_RESPONDER.to_string())
    }

    pub fn handle(&self) -> Option<String> {
        self.username
            .as_deref()
            .map(|u| u.trim().trim_start_matches('@'))
            .filter(|u| !u.is_empty())
            .map(|u| format!("@{}", u))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Approve,
    Decline,
}

impl DecisionAction {
    /// Accepts both the verb and the past participle, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "approve" | "approved" => Some(DecisionAction::Approve),
            "decline" | "declined" => Some(DecisionAction::Decline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Approve => "approve",
            DecisionAction::Decline => "decline",
        }
    }

    pub fn resulting_status(&self) -> RequestStatus {
        match self {
            DecisionAction::Approve => RequestStatus::Approved,
            DecisionAction::Decline => RequestStatus::Declined,
        }
    }

    /// Payload carried by the interactive button, `action:request_id`.
    pub fn callback_data(&self, request_id: &str) -> String {
        format!("{}:{}", self.as_str(), request_id)
    }
}

/// The single transition out of `pending`, applied by a conditional store update.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub status: RequestStatus,
    pub responder_name: String,
    pub responder_handle: Option<String>,
    pub responded_at: DateTime<Utc>,
}

impl Settlement {
    pub fn decision(
        action: DecisionAction,
        responder: &ResponderIdentity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: action.resulting_status(),
            responder_name: responder.display_name(),
            responder_handle: responder.handle(),
            responded_at: now,
        }
    }

    pub fn expiry(now: DateTime<Utc>) -> Self {
        Self {
            status: RequestStatus::Expired,
            responder_name: EXPIRY_RESPONDER.to_string(),
            responder_handle: None,
            responded_at: now,
        }
    }

    /// Reviewer decisions only commit while the request is still inside its window.
    pub fn requires_unexpired(&self) -> bool {
        matches!(
            self.status,
            RequestStatus::Approved | RequestStatus::Declined
        )
    }
}

/// Read projection returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub id: String,
    pub status: RequestStatus,
    pub responder_name: Option<String>,
    pub responder_handle: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub notification_message_ref: Option<String>,
}

impl From<&AccessRequest> for StatusView {
    fn from(r: &AccessRequest) -> Self {
        Self {
            id: r.id.clone(),
            status: r.status,
            responder_name: r.responder_name.clone(),
            responder_handle: r.responder_handle.clone(),
            responded_at: r.responded_at,
            expires_at: r.expires_at,
            notification_message_ref: r.notification_message_ref.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(id: &str) -> NewAccessRequest {
        NewAccessRequest {
            id: Some(id.to_string()),
            requestor_name: Some("Dana Scully".to_string()),
            login_name: None,
            system_name: Some("prod-db".to_string()),
            access_type: Some("root".to_string()),
            reason: Some("incident 4411".to_string()),
            requested_at: None,
        }
    }

    #[test]
    fn test_into_pending_computes_expiry_from_requested_at() {
        let now = Utc::now();
        let requested_at = now - Duration::minutes(3);
        let mut fields = submission("r1");
        fields.requested_at = Some(requested_at);

        let req = fields.into_pending(now, Duration::minutes(15)).unwrap();
        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(req.requested_at, requested_at);
        assert_eq!(req.expires_at, requested_at + Duration::minutes(15));
        assert!(req.responder_name.is_none());
        assert!(req.responded_at.is_none());
    }

    #[test]
    fn test_into_pending_defaults_requested_at_to_now() {
        let now = Utc::now();
        let req = submission("r1").into_pending(now, Duration::minutes(15)).unwrap();
        assert_eq!(req.requested_at, now);
    }

    #[test]
    fn test_into_pending_lists_every_missing_field() {
        let fields = NewAccessRequest {
            id: Some("  ".to_string()),
            reason: Some("because".to_string()),
            ..Default::default()
        };
        let err = fields
            .into_pending(Utc::now(), Duration::minutes(15))
            .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, AppError::Validation(_)));
        for field in ["id", "requestor_name", "system_name", "access_type"] {
            assert!(msg.contains(field), "missing '{}' in: {}", field, msg);
        }
        assert!(!msg.contains("reason"));
    }

    #[test]
    fn test_into_pending_rejects_out_of_range_requested_at() {
        let mut fields: NewAccessRequest = serde_json::from_value(serde_json::json!({
            "id": "far",
            "requestor_name": "Jane Doe",
            "system_name": "prod-db",
            "access_type": "admin",
            "reason": "incident",
            "timestamp": "+262142-12-31T23:59:00Z"
        }))
        .unwrap();
        assert!(fields.requested_at.is_some());

        let err = fields
            .clone()
            .into_pending(Utc::now(), Duration::minutes(15))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref msg) if msg.contains("out of range")));

        fields.requested_at = Some(DateTime::<Utc>::MAX_UTC);
        assert!(fields.into_pending(Utc::now(), Duration::minutes(15)).is_err());
    }

    #[test]
    fn test_submission_accepts_legacy_field_names() {
        let fields: NewAccessRequest = serde_json::from_value(serde_json::json!({
            "request_uuid": "abc",
            "requestor_fullname": "Fox Mulder",
            "login_fullname": "fmulder",
            "system_name": "archive",
            "type": "read",
            "reason": "x-files",
            "timestamp": "2025-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(fields.id.as_deref(), Some("abc"));
        assert_eq!(fields.access_type.as_deref(), Some("read"));
        assert_eq!(fields.login_name.as_deref(), Some("fmulder"));
        assert!(fields.requested_at.is_some());
    }

    #[test]
    fn test_display_name_prefers_full_name() {
        let who = ResponderIdentity {
            first_name: Some("Alice".into()),
            last_name: Some("Liddell".into()),
            username: Some("alice".into()),
        };
        assert_eq!(who.display_name(), "Alice Liddell");
        assert_eq!(who.handle().as_deref(), Some("@alice"));
    }

    #[test]
    fn test_display_name_falls_back_to_handle_then_unknown() {
        let handle_only = ResponderIdentity {
            first_name: Some("  ".into()),
            username: Some("bob".into()),
            ..Default::default()
        };
        assert_eq!(handle_only.display_name(), "@bob");

        let nobody = ResponderIdentity::default();
        assert_eq!(nobody.display_name(), UNKNOWN_RESPONDER);
        assert!(nobody.handle().is_none());
    }

    #[test]
    fn test_decision_action_parse() {
        assert_eq!(DecisionAction::parse("approve"), Some(DecisionAction::Approve));
        assert_eq!(DecisionAction::parse("APPROVED"), Some(DecisionAction::Approve));
        assert_eq!(DecisionAction::parse(" decline "), Some(DecisionAction::Decline));
        assert_eq!(DecisionAction::parse("declined"), Some(DecisionAction::Decline));
        assert_eq!(DecisionAction::parse("reject"), None);
        assert_eq!(DecisionAction::parse(""), None);
    }

    #[test]
    fn test_settlement_guards() {
        let now = Utc::now();
        let approve = Settlement::decision(DecisionAction::Approve, &ResponderIdentity::named("ops"), now);
        assert_eq!(approve.status, RequestStatus::Approved);
        assert!(approve.requires_unexpired());

        let expiry = Settlement::expiry(now);
        assert_eq!(expiry.status, RequestStatus::Expired);
        assert_eq!(expiry.responder_name, EXPIRY_RESPONDER);
        assert!(!expiry.requires_unexpired());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(RequestStatus::Declined).unwrap(), "declined");
        assert!(RequestStatus::Expired.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
    }
}
