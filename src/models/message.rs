use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message document in `appointmentChatMessages`. Read receipts are a list
/// of user ids (`readBy`), the send time lives in `sentAt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub thread_id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: String,
    pub sent_at: DateTime<Utc>,
    pub read_by: Vec<String>,
}

/// Message document in `chatMessages` (member mode). The body field is
/// `message`, the send time `timestamp`, and the receipt a single flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub member_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// Tolerant read shape: every field either schema variant may carry, all
/// optional. Old documents mix the two vocabularies, so reads go through
/// this and then `normalize()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_role: Option<String>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_by: Option<Vec<String>>,
    #[serde(default)]
    pub read: Option<bool>,
}

/// The one shape the frontend renders. `text`/`message` carry the same
/// body and `sentAt`/`timestamp` the same instant regardless of which
/// schema variant the document came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub message: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: String,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_by: Vec<String>,
    #[serde(default)]
    pub read: bool,
}

impl StoredMessage {
    pub fn normalize(self) -> ChatMessage {
        let body = self
            .text
            .filter(|t| !t.is_empty())
            .or(self.message)
            .unwrap_or_default();
        let when = self.sent_at.or(self.timestamp);
        ChatMessage {
            id: self.id,
            text: body.clone(),
            message: body,
            sender_id: self.sender_id.unwrap_or_default(),
            sender_name: self.sender_name.unwrap_or_default(),
            sender_role: self.sender_role.unwrap_or_else(|| "unknown".to_string()),
            sent_at: when,
            timestamp: when,
            read_by: self.read_by.unwrap_or_default(),
            read: self.read.unwrap_or(false),
        }
    }
}

impl From<AppointmentMessage> for ChatMessage {
    fn from(msg: AppointmentMessage) -> Self {
        ChatMessage {
            id: msg.id,
            text: msg.text.clone(),
            message: msg.text,
            sender_id: msg.sender_id,
            sender_name: msg.sender_name,
            sender_role: msg.sender_role,
            sent_at: Some(msg.sent_at),
            timestamp: Some(msg.sent_at),
            read_by: msg.read_by,
            read: false,
        }
    }
}

impl From<MemberMessage> for ChatMessage {
    fn from(msg: MemberMessage) -> Self {
        ChatMessage {
            id: msg.id,
            text: msg.message.clone(),
            message: msg.message,
            sender_id: msg.sender_id,
            sender_name: msg.sender_name,
            sender_role: msg.sender_role,
            sent_at: Some(msg.timestamp),
            timestamp: Some(msg.timestamp),
            read_by: Vec::new(),
            read: msg.read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap()
    }

    #[test]
    fn normalizes_appointment_variant() {
        let stored = StoredMessage {
            id: "m1".to_string(),
            text: Some("See you Tuesday".to_string()),
            sender_id: Some("staff-1".to_string()),
            sender_name: Some("Dr. Reyes".to_string()),
            sender_role: Some("userDentist".to_string()),
            sent_at: Some(sample_instant()),
            read_by: Some(vec!["staff-1".to_string()]),
            ..Default::default()
        };
        let msg = stored.normalize();
        assert_eq!(msg.text, "See you Tuesday");
        assert_eq!(msg.message, msg.text);
        assert_eq!(msg.sent_at, Some(sample_instant()));
        assert_eq!(msg.timestamp, msg.sent_at);
        assert_eq!(msg.read_by, vec!["staff-1".to_string()]);
        assert!(!msg.read);
    }

    #[test]
    fn normalizes_member_variant() {
        let stored = StoredMessage {
            id: "m2".to_string(),
            message: Some("Your cleaning is confirmed".to_string()),
            sender_id: Some("admin-1".to_string()),
            sender_name: Some("Front Desk".to_string()),
            sender_role: Some("admin".to_string()),
            timestamp: Some(sample_instant()),
            read: Some(true),
            ..Default::default()
        };
        let msg = stored.normalize();
        assert_eq!(msg.text, "Your cleaning is confirmed");
        assert_eq!(msg.message, msg.text);
        assert_eq!(msg.sent_at, Some(sample_instant()));
        assert_eq!(msg.timestamp, msg.sent_at);
        assert!(msg.read_by.is_empty());
        assert!(msg.read);
    }

    #[test]
    fn both_variants_normalize_to_the_same_shape() {
        let appointment = StoredMessage {
            id: "m3".to_string(),
            text: Some("hello".to_string()),
            sender_id: Some("u1".to_string()),
            sender_name: Some("A".to_string()),
            sender_role: Some("userPatient".to_string()),
            sent_at: Some(sample_instant()),
            read_by: Some(vec![]),
            ..Default::default()
        }
        .normalize();

        let member = StoredMessage {
            id: "m3".to_string(),
            message: Some("hello".to_string()),
            sender_id: Some("u1".to_string()),
            sender_name: Some("A".to_string()),
            sender_role: Some("userPatient".to_string()),
            timestamp: Some(sample_instant()),
            ..Default::default()
        }
        .normalize();

        assert_eq!(appointment.text, member.text);
        assert_eq!(appointment.message, member.message);
        assert_eq!(appointment.sent_at, member.sent_at);
        assert_eq!(appointment.timestamp, member.timestamp);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let msg = StoredMessage {
            id: "m4".to_string(),
            ..Default::default()
        }
        .normalize();
        assert_eq!(msg.text, "");
        assert_eq!(msg.sender_role, "unknown");
        assert_eq!(msg.sent_at, None);
        assert_eq!(msg.timestamp, None);
        assert!(msg.read_by.is_empty());
        assert!(!msg.read);
    }
}
