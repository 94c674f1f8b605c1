use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which document shape a conversation lives in: appointment threads are
/// keyed by `{appointmentId}_{patientId}`, member chats by the member id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Appointment,
    Member,
}

impl Default for ChatType {
    fn default() -> Self {
        ChatType::Appointment
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Appointment context cached on the thread so the drawer can render
/// without a second lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentMeta {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
}

/// Thread metadata document in `appointmentChats`. The `_id` is the derived
/// thread id, so lookups from an appointment card are a single `find_one`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatThread {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    pub participants: Vec<String>,
    #[serde(default)]
    pub participant_profiles: HashMap<String, ParticipantProfile>,
    #[serde(default)]
    pub appointment_meta: AppointmentMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub last_sender_id: String,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Per-user unread counters keyed by user id.
    #[serde(default)]
    pub unread_count: HashMap<String, i64>,
}

/// Chat metadata document in `chats` (member mode). One document per member,
/// `_id` = member id, single scalar unread counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberChat {
    #[serde(rename = "_id")]
    pub id: String,
    pub member_id: String,
    pub member_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: i64,
}

/// Unread counters come in two shapes depending on the chat type: a per-user
/// map for appointment threads, a plain total for member chats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnreadCount {
    Total(i64),
    PerUser(HashMap<String, i64>),
}

impl Default for UnreadCount {
    fn default() -> Self {
        UnreadCount::PerUser(HashMap::new())
    }
}

/// The unified metadata shape handed back by the thread resolver, the same
/// for both chat types so the drawer renders either without branching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMetadata {
    pub id: String,
    pub chat_type: ChatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_name: Option<String>,
    pub participants: Vec<String>,
    #[serde(default)]
    pub participant_profiles: HashMap<String, ParticipantProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_meta: Option<AppointmentMeta>,
    #[serde(default)]
    pub last_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sender_id: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: UnreadCount,
}

impl ChatThread {
    pub fn into_metadata(self) -> ThreadMetadata {
        ThreadMetadata {
            id: self.id,
            chat_type: ChatType::Appointment,
            appointment_id: self.appointment_id,
            patient_id: self.patient_id,
            member_id: None,
            member_name: None,
            participants: self.participants,
            participant_profiles: self.participant_profiles,
            appointment_meta: Some(self.appointment_meta),
            last_message: self.last_message,
            last_sender_id: if self.last_sender_id.is_empty() {
                None
            } else {
                Some(self.last_sender_id)
            },
            last_message_at: self.last_message_at,
            unread_count: UnreadCount::PerUser(
                self.unread_count
                    .into_iter()
                    .map(|(user, n)| (user, n.max(0)))
                    .collect(),
            ),
        }
    }
}

/// Row shape for the staff-facing member chat directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberChatSummary {
    pub id: String,
    pub member_id: String,
    pub member_name: String,
    pub last_message: String,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

impl From<MemberChat> for MemberChatSummary {
    fn from(chat: MemberChat) -> Self {
        let member_id = if chat.member_id.is_empty() {
            chat.id.clone()
        } else {
            chat.member_id
        };
        let member_name = if chat.member_name.is_empty() {
            "Member".to_string()
        } else {
            chat.member_name
        };
        MemberChatSummary {
            id: chat.id,
            member_id,
            member_name,
            last_message: chat.last_message,
            last_message_time: chat.last_message_time,
            unread_count: chat.unread_count.max(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_count_deserializes_both_shapes() {
        let scalar: UnreadCount = serde_json::from_str("3").unwrap();
        assert_eq!(scalar, UnreadCount::Total(3));

        let map: UnreadCount = serde_json::from_str(r#"{"u1": 2, "u2": 0}"#).unwrap();
        match map {
            UnreadCount::PerUser(m) => {
                assert_eq!(m.get("u1"), Some(&2));
                assert_eq!(m.get("u2"), Some(&0));
            }
            other => panic!("expected per-user map, got {:?}", other),
        }
    }

    fn thread_with_unread(unread: HashMap<String, i64>) -> ChatThread {
        ChatThread {
            id: "apt-1_pat-1".to_string(),
            appointment_id: Some("apt-1".to_string()),
            patient_id: Some("pat-1".to_string()),
            participants: vec!["staff-1".to_string(), "pat-1".to_string()],
            participant_profiles: HashMap::new(),
            appointment_meta: AppointmentMeta::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_message: String::new(),
            last_sender_id: String::new(),
            last_message_at: None,
            unread_count: unread,
        }
    }

    #[test]
    fn metadata_clamps_negative_unread_counters() {
        let mut unread = HashMap::new();
        unread.insert("staff-1".to_string(), -4);
        unread.insert("pat-1".to_string(), 2);
        let metadata = thread_with_unread(unread).into_metadata();
        match metadata.unread_count {
            UnreadCount::PerUser(map) => {
                assert_eq!(map.get("staff-1"), Some(&0));
                assert_eq!(map.get("pat-1"), Some(&2));
            }
            other => panic!("expected per-user map, got {:?}", other),
        }
    }

    #[test]
    fn metadata_drops_empty_last_sender() {
        let metadata = thread_with_unread(HashMap::new()).into_metadata();
        assert_eq!(metadata.last_sender_id, None);
        assert_eq!(metadata.chat_type, ChatType::Appointment);
    }

    #[test]
    fn member_chat_summary_falls_back_to_defaults() {
        let chat = MemberChat {
            id: "member-1".to_string(),
            member_id: String::new(),
            member_name: String::new(),
            created_at: Utc::now(),
            last_message: String::new(),
            last_message_time: None,
            unread_count: -2,
        };
        let summary = MemberChatSummary::from(chat);
        assert_eq!(summary.member_id, "member-1");
        assert_eq!(summary.member_name, "Member");
        assert_eq!(summary.unread_count, 0);
    }
}
