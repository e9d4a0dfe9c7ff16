use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A message popped from the profile-event queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueMessage {
    #[serde(rename = "msg_id", alias = "id")]
    pub id: i64,
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub read_ct: Option<i32>,
    #[serde(default)]
    pub enqueued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vt: Option<DateTime<Utc>>,
}

impl QueueMessage {
    pub fn new(id: i64, message: Value) -> Self {
        Self {
            id,
            message,
            read_ct: None,
            enqueued_at: None,
            vt: None,
        }
    }
}

/// A validated follow/unfollow event ready for the remote transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowEvent {
    pub action: String,
    pub follower_id: String,
    pub following_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotAnObject,
    MissingAction,
    MissingData,
    MissingFollowerId,
    MissingFollowingId,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotAnObject => "not_an_object",
            SkipReason::MissingAction => "missing_action",
            SkipReason::MissingData => "missing_data",
            SkipReason::MissingFollowerId => "missing_follower_id",
            SkipReason::MissingFollowingId => "missing_following_id",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FollowEvent {
    /// Extract an event from a raw queue payload of the shape
    /// `{ action, data: { follower_id, following_id } }`.
    pub fn from_payload(payload: &Value) -> Result<Self, SkipReason> {
        let obj = payload.as_object().ok_or(SkipReason::NotAnObject)?;
        let action = non_empty_str(obj.get("action")).ok_or(SkipReason::MissingAction)?;
        let data = obj
            .get("data")
            .and_then(Value::as_object)
            .ok_or(SkipReason::MissingData)?;
        let follower_id =
            non_empty_str(data.get("follower_id")).ok_or(SkipReason::MissingFollowerId)?;
        let following_id =
            non_empty_str(data.get("following_id")).ok_or(SkipReason::MissingFollowingId)?;
        Ok(Self {
            action: action.to_string(),
            follower_id: follower_id.to_string(),
            following_id: following_id.to_string(),
        })
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::Manual => "manual",
        }
    }
}

/// What happened to a single message within a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    /// Transition applied. `archived` is false when acknowledging failed and the
    /// message may be delivered again.
    Processed { id: i64, archived: bool },
    Skipped { id: i64, reason: SkipReason },
    Failed { id: i64, error: String },
}

impl MessageOutcome {
    pub fn id(&self) -> i64 {
        match self {
            MessageOutcome::Processed { id, .. }
            | MessageOutcome::Skipped { id, .. }
            | MessageOutcome::Failed { id, .. } => *id,
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, MessageOutcome::Processed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub trigger: TriggerKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<MessageOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
}

impl BatchReport {
    pub fn processed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_processed()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MessageOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MessageOutcome::Failed { .. }))
            .count()
    }

    /// Number of messages popped in this batch.
    pub fn received(&self) -> usize {
        self.outcomes.len()
    }

    pub fn summary(&self) -> String {
        format!("Processed {} messages", self.processed_count())
    }
}

/// Body returned to whoever triggered the drain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrainResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DrainResponse {
    pub fn completed(report: &BatchReport) -> Self {
        Self {
            success: true,
            message: Some(report.summary()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_payload_extracts_ids() {
        let payload = json!({
            "action": "follow",
            "data": { "follower_id": "A", "following_id": "B" }
        });
        let event = FollowEvent::from_payload(&payload).unwrap();
        assert_eq!(
            event,
            FollowEvent {
                action: "follow".into(),
                follower_id: "A".into(),
                following_id: "B".into(),
            }
        );
    }

    #[test]
    fn from_payload_ignores_extra_fields() {
        let payload = json!({
            "action": "unfollow",
            "created_at": "2024-05-01T00:00:00Z",
            "data": { "follower_id": "A", "following_id": "B", "source": "profile" }
        });
        let event = FollowEvent::from_payload(&payload).unwrap();
        assert_eq!(event.action, "unfollow");
    }

    #[test]
    fn from_payload_rejects_malformed_shapes() {
        let cases = [
            (json!(null), SkipReason::NotAnObject),
            (json!("follow"), SkipReason::NotAnObject),
            (json!({}), SkipReason::MissingAction),
            (json!({ "action": "" , "data": {} }), SkipReason::MissingAction),
            (json!({ "action": 3, "data": {} }), SkipReason::MissingAction),
            (json!({ "action": "follow" }), SkipReason::MissingData),
            (json!({ "action": "follow", "data": [] }), SkipReason::MissingData),
            (
                json!({ "action": "follow", "data": { "following_id": "B" } }),
                SkipReason::MissingFollowerId,
            ),
            (
                json!({ "action": "follow", "data": { "follower_id": "A" } }),
                SkipReason::MissingFollowingId,
            ),
            (
                json!({ "action": "follow", "data": { "follower_id": "A", "following_id": null } }),
                SkipReason::MissingFollowingId,
            ),
        ];
        for (payload, expected) in cases {
            assert_eq!(FollowEvent::from_payload(&payload), Err(expected), "{payload}");
        }
    }

    #[test]
    fn queue_message_accepts_pgmq_row() {
        let row = json!({
            "msg_id": 7,
            "read_ct": 1,
            "enqueued_at": "2024-05-01T10:00:00.123456+00:00",
            "vt": "2024-05-01T10:00:30+00:00",
            "message": { "action": "follow" }
        });
        let msg: QueueMessage = serde_json::from_value(row).unwrap();
        assert_eq!(msg.id, 7);
        assert_eq!(msg.read_ct, Some(1));
        assert!(msg.enqueued_at.is_some());

        let short: QueueMessage = serde_json::from_value(json!({ "id": 2 })).unwrap();
        assert_eq!(short.id, 2);
        assert_eq!(short.message, Value::Null);
    }

    #[test]
    fn response_bodies_match_contract() {
        let now = Utc::now();
        let report = BatchReport {
            run_id: Uuid::new_v4(),
            trigger: TriggerKind::Manual,
            started_at: now,
            finished_at: now,
            outcomes: vec![
                MessageOutcome::Processed { id: 1, archived: true },
                MessageOutcome::Processed { id: 2, archived: false },
                MessageOutcome::Skipped { id: 3, reason: SkipReason::MissingData },
            ],
            read_error: None,
        };
        assert_eq!(
            serde_json::to_value(DrainResponse::completed(&report)).unwrap(),
            json!({ "success": true, "message": "Processed 2 messages" })
        );
        assert_eq!(
            serde_json::to_value(DrainResponse::failed("boom")).unwrap(),
            json!({ "success": false, "error": "boom" })
        );
    }
}
