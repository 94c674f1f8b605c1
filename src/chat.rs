// src/chat.rs
//
// Thread lifecycle for the two conversation modes: appointment threads
// (keyed by appointment+patient) and member chats (keyed by member id).
// Sending a message is a small side-effect chain: insert the message,
// refresh the thread's last-message cache, bump the recipient's unread
// counter, write a notification, then hand the normalized message to the
// ChatServer for WebSocket fan-out.

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use futures_util::StreamExt;
use log::error;
use mongodb::bson::{doc, to_bson, Document};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::{auth_user, ROLE_PATIENT, ROLE_SECRETARY};
use crate::chat_server::{BroadcastMessage, BroadcastNotification};
use crate::db::{
    MongoDB, CHAT_COLLECTION, CHAT_MESSAGES_COLLECTION, MEMBER_CHAT_COLLECTION,
    MEMBER_CHAT_MESSAGES_COLLECTION, NOTIFICATIONS_COLLECTION,
};
use crate::models::message::{AppointmentMessage, ChatMessage, MemberMessage, StoredMessage};
use crate::models::notification::{Notification, NotificationMetadata, NOTIFICATION_TYPE_CHAT};
use crate::models::thread::{
    AppointmentMeta, ChatThread, ChatType, MemberChat, MemberChatSummary, ParticipantProfile,
    ThreadMetadata, UnreadCount,
};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Missing appointmentId or patientId for chat thread")]
    MissingThreadKeys,
    #[error("Member chat requires patientId or recipientId")]
    MissingMemberId,
    #[error("Appointment chat requires appointmentId or threadId")]
    MissingAppointmentContext,
    #[error("Chat thread {0} not found")]
    ThreadNotFound(String),
    #[error("Message text is empty")]
    EmptyMessage,
    #[error(transparent)]
    Database(#[from] mongodb::error::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] mongodb::bson::ser::Error),
}

/// Who is talking. `uid` always comes from the verified token, the display
/// fields from the client context.
#[derive(Debug, Clone)]
pub struct ChatSenderInfo {
    pub uid: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

/// Client-side context for opening a conversation, mirroring what the chat
/// drawer knows when it opens (appointment card, notification, directory).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadContext {
    #[serde(default)]
    pub chat_type: Option<ChatType>,
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub appointment_date: Option<String>,
    #[serde(default)]
    pub appointment_time: Option<String>,
    #[serde(default)]
    pub appointment_service: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub patient_email: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
}

/// Everything a completed send produces: the normalized message for
/// fan-out, who should see it, and the notification written for the
/// recipient (if one was resolved).
#[derive(Debug, Clone)]
pub struct MessageDelivery {
    pub thread_id: String,
    pub chat_type: ChatType,
    pub message: ChatMessage,
    pub recipients: Vec<String>,
    pub notification: Option<Notification>,
}

/// Appointment threads are keyed by both halves so the same conversation is
/// found from the appointment card and from the patient's side.
pub fn build_thread_id(
    appointment_id: Option<&str>,
    patient_id: Option<&str>,
) -> Result<String, ChatError> {
    match (appointment_id, patient_id) {
        (Some(a), Some(p)) if !a.is_empty() && !p.is_empty() => Ok(format!("{}_{}", a, p)),
        _ => Err(ChatError::MissingThreadKeys),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Recipient of the unread bump and notification: explicit hint, then the
/// thread's patient, then any other participant. The sender is skipped at
/// every step so a patient replying on their own thread never notifies
/// themselves.
fn resolve_recipient(thread: &ChatThread, sender_id: &str, hint: Option<&str>) -> Option<String> {
    hint.filter(|h| !h.is_empty() && *h != sender_id)
        .map(String::from)
        .or_else(|| {
            thread
                .patient_id
                .clone()
                .filter(|p| !p.is_empty() && p != sender_id)
        })
        .or_else(|| {
            thread
                .participants
                .iter()
                .find(|p| p.as_str() != sender_id)
                .cloned()
        })
}

fn dedup_participants(candidates: Vec<Option<String>>) -> Vec<String> {
    let mut participants: Vec<String> = Vec::new();
    for candidate in candidates.into_iter().flatten() {
        if !candidate.is_empty() && !participants.contains(&candidate) {
            participants.push(candidate);
        }
    }
    participants
}

/// The dual-mode resolver: decides which document shape the conversation
/// lives in, creates the document on first contact, and returns one unified
/// metadata shape for either mode.
pub async fn ensure_thread(
    db: &MongoDB,
    ctx: &ThreadContext,
    sender: &ChatSenderInfo,
) -> Result<ThreadMetadata, ChatError> {
    match ctx.chat_type.unwrap_or_default() {
        ChatType::Member => ensure_member_chat(db, ctx, sender).await,
        ChatType::Appointment => ensure_appointment_thread(db, ctx, sender).await,
    }
}

async fn ensure_member_chat(
    db: &MongoDB,
    ctx: &ThreadContext,
    sender: &ChatSenderInfo,
) -> Result<ThreadMetadata, ChatError> {
    let member_id = non_empty(ctx.patient_id.clone())
        .or_else(|| non_empty(ctx.recipient_id.clone()))
        .ok_or(ChatError::MissingMemberId)?;

    let chats = db.db.collection::<MemberChat>(MEMBER_CHAT_COLLECTION);
    let chat = match chats.find_one(doc! { "_id": &member_id }).await? {
        Some(chat) => chat,
        None => {
            let member_name = non_empty(ctx.patient_name.clone())
                .or_else(|| non_empty(ctx.recipient_name.clone()))
                .unwrap_or_else(|| "Member".to_string());
            let new_chat = MemberChat {
                id: member_id.clone(),
                member_id: member_id.clone(),
                member_name,
                created_at: Utc::now(),
                last_message: String::new(),
                last_message_time: Some(Utc::now()),
                unread_count: 0,
            };
            chats.insert_one(&new_chat).await?;
            new_chat
        }
    };

    let member_name = if chat.member_name.is_empty() {
        non_empty(ctx.patient_name.clone())
            .or_else(|| non_empty(ctx.recipient_name.clone()))
            .unwrap_or_else(|| "Member".to_string())
    } else {
        chat.member_name.clone()
    };

    let mut profiles = HashMap::new();
    profiles.insert(
        member_id.clone(),
        ParticipantProfile {
            id: member_id.clone(),
            name: member_name.clone(),
            email: ctx.patient_email.clone(),
            role: ROLE_PATIENT.to_string(),
            avatar_url: None,
        },
    );
    profiles.insert(
        sender.uid.clone(),
        ParticipantProfile {
            id: sender.uid.clone(),
            name: sender.name.clone(),
            email: sender.email.clone(),
            role: sender
                .role
                .clone()
                .unwrap_or_else(|| ROLE_SECRETARY.to_string()),
            avatar_url: None,
        },
    );

    Ok(ThreadMetadata {
        id: member_id.clone(),
        chat_type: ChatType::Member,
        appointment_id: None,
        patient_id: None,
        member_id: Some(member_id.clone()),
        member_name: Some(member_name),
        participants: vec![member_id, sender.uid.clone()],
        participant_profiles: profiles,
        appointment_meta: None,
        last_message: chat.last_message,
        last_sender_id: None,
        last_message_at: chat.last_message_time,
        unread_count: UnreadCount::Total(chat.unread_count.max(0)),
    })
}

async fn ensure_appointment_thread(
    db: &MongoDB,
    ctx: &ThreadContext,
    sender: &ChatSenderInfo,
) -> Result<ThreadMetadata, ChatError> {
    if non_empty(ctx.appointment_id.clone()).is_none() && non_empty(ctx.thread_id.clone()).is_none()
    {
        return Err(ChatError::MissingAppointmentContext);
    }

    let thread_id = match non_empty(ctx.thread_id.clone()) {
        Some(id) => id,
        None => build_thread_id(ctx.appointment_id.as_deref(), ctx.patient_id.as_deref())?,
    };

    let threads = db.db.collection::<ChatThread>(CHAT_COLLECTION);
    let existing = threads.find_one(doc! { "_id": &thread_id }).await?;

    // Merge the sender (and the patient, when known) into the profile map,
    // preferring fresh context over whatever the thread already holds.
    let mut profiles = existing
        .as_ref()
        .map(|t| t.participant_profiles.clone())
        .unwrap_or_default();
    profiles.insert(
        sender.uid.clone(),
        ParticipantProfile {
            id: sender.uid.clone(),
            name: sender.name.clone(),
            email: sender.email.clone(),
            role: sender.role.clone().unwrap_or_else(|| "unknown".to_string()),
            avatar_url: None,
        },
    );
    if let Some(patient_id) = non_empty(ctx.patient_id.clone()) {
        let prior = existing
            .as_ref()
            .and_then(|t| t.participant_profiles.get(&patient_id));
        let profile = ParticipantProfile {
            id: patient_id.clone(),
            name: non_empty(ctx.patient_name.clone())
                .or_else(|| prior.map(|p| p.name.clone()))
                .unwrap_or_else(|| "Member".to_string()),
            email: ctx
                .patient_email
                .clone()
                .or_else(|| prior.and_then(|p| p.email.clone())),
            role: prior
                .map(|p| p.role.clone())
                .unwrap_or_else(|| ROLE_PATIENT.to_string()),
            avatar_url: prior.and_then(|p| p.avatar_url.clone()),
        };
        profiles.insert(patient_id, profile);
    }

    match existing {
        None => {
            let now = Utc::now();
            let thread = ChatThread {
                id: thread_id.clone(),
                appointment_id: non_empty(ctx.appointment_id.clone()),
                patient_id: non_empty(ctx.patient_id.clone()),
                participants: dedup_participants(vec![
                    Some(sender.uid.clone()),
                    ctx.patient_id.clone(),
                    ctx.recipient_id.clone(),
                ]),
                participant_profiles: profiles,
                appointment_meta: AppointmentMeta {
                    date: ctx.appointment_date.clone(),
                    time: ctx.appointment_time.clone(),
                    service: ctx.appointment_service.clone(),
                },
                created_at: now,
                updated_at: now,
                last_message: String::new(),
                last_sender_id: String::new(),
                last_message_at: None,
                unread_count: HashMap::new(),
            };
            threads.insert_one(&thread).await?;
        }
        Some(thread) => {
            let meta = AppointmentMeta {
                date: non_empty(ctx.appointment_date.clone()).or(thread.appointment_meta.date),
                time: non_empty(ctx.appointment_time.clone()).or(thread.appointment_meta.time),
                service: non_empty(ctx.appointment_service.clone())
                    .or(thread.appointment_meta.service),
            };
            let mut set_doc = Document::new();
            set_doc.insert("participantProfiles", to_bson(&profiles)?);
            set_doc.insert("appointmentMeta", to_bson(&meta)?);
            threads
                .update_one(doc! { "_id": &thread_id }, doc! { "$set": set_doc })
                .await?;
        }
    }

    let thread = threads
        .find_one(doc! { "_id": &thread_id })
        .await?
        .ok_or_else(|| ChatError::ThreadNotFound(thread_id.clone()))?;
    Ok(thread.into_metadata())
}

pub async fn deliver_appointment_message(
    db: &MongoDB,
    thread_id: &str,
    sender: &ChatSenderInfo,
    text: &str,
    recipient_hint: Option<&str>,
) -> Result<MessageDelivery, ChatError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ChatError::EmptyMessage);
    }

    let threads = db.db.collection::<ChatThread>(CHAT_COLLECTION);
    let thread = threads
        .find_one(doc! { "_id": thread_id })
        .await?
        .ok_or_else(|| ChatError::ThreadNotFound(thread_id.to_string()))?;

    let now = Utc::now();
    let message = AppointmentMessage {
        id: Uuid::new_v4().to_string(),
        thread_id: thread_id.to_string(),
        text: trimmed.to_string(),
        sender_id: sender.uid.clone(),
        sender_name: sender.name.clone(),
        sender_role: sender.role.clone().unwrap_or_else(|| "unknown".to_string()),
        sent_at: now,
        read_by: vec![sender.uid.clone()],
    };
    db.db
        .collection::<AppointmentMessage>(CHAT_MESSAGES_COLLECTION)
        .insert_one(&message)
        .await?;

    // Last-message cache plus the sender's own counter going back to zero.
    let mut cache = Document::new();
    cache.insert("lastMessage", trimmed);
    cache.insert("lastSenderId", sender.uid.as_str());
    cache.insert("lastMessageAt", to_bson(&now)?);
    cache.insert("updatedAt", to_bson(&now)?);
    cache.insert(format!("unreadCount.{}", sender.uid), 0_i64);
    threads
        .update_one(doc! { "_id": thread_id }, doc! { "$set": cache })
        .await?;

    let mut notification = None;
    if let Some(recipient_id) = resolve_recipient(&thread, &sender.uid, recipient_hint) {
        let mut inc = Document::new();
        inc.insert(format!("unreadCount.{}", recipient_id), 1_i64);
        threads
            .update_one(doc! { "_id": thread_id }, doc! { "$inc": inc })
            .await?;

        let patient_name = thread
            .patient_id
            .as_ref()
            .and_then(|pid| thread.participant_profiles.get(pid))
            .map(|p| p.name.clone());
        let note = Notification {
            id: Uuid::new_v4().to_string(),
            user_id: recipient_id,
            kind: NOTIFICATION_TYPE_CHAT.to_string(),
            message: trimmed.to_string(),
            thread_id: Some(thread_id.to_string()),
            chat_type: Some(ChatType::Appointment),
            appointment_id: thread.appointment_id.clone(),
            patient_id: thread.patient_id.clone(),
            created_at: now,
            read: false,
            metadata: NotificationMetadata {
                sender_id: Some(sender.uid.clone()),
                sender_name: Some(sender.name.clone()),
                appointment_date: thread.appointment_meta.date.clone(),
                appointment_time: thread.appointment_meta.time.clone(),
                patient_name,
                status: None,
            },
        };
        db.db
            .collection::<Notification>(NOTIFICATIONS_COLLECTION)
            .insert_one(&note)
            .await?;
        notification = Some(note);
    }

    let recipients = thread
        .participants
        .iter()
        .filter(|p| p.as_str() != sender.uid)
        .cloned()
        .collect();

    Ok(MessageDelivery {
        thread_id: thread_id.to_string(),
        chat_type: ChatType::Appointment,
        message: ChatMessage::from(message),
        recipients,
        notification,
    })
}

pub async fn deliver_member_message(
    db: &MongoDB,
    member_id: &str,
    sender: &ChatSenderInfo,
    text: &str,
) -> Result<MessageDelivery, ChatError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ChatError::EmptyMessage);
    }

    let chats = db.db.collection::<MemberChat>(MEMBER_CHAT_COLLECTION);
    let chat = chats
        .find_one(doc! { "_id": member_id })
        .await?
        .ok_or_else(|| ChatError::ThreadNotFound(member_id.to_string()))?;

    let now = Utc::now();
    let message = MemberMessage {
        id: Uuid::new_v4().to_string(),
        member_id: member_id.to_string(),
        sender_id: sender.uid.clone(),
        sender_name: sender.name.clone(),
        // Staff side of a member chat always writes as admin.
        sender_role: "admin".to_string(),
        message: trimmed.to_string(),
        timestamp: now,
        read: false,
    };
    db.db
        .collection::<MemberMessage>(MEMBER_CHAT_MESSAGES_COLLECTION)
        .insert_one(&message)
        .await?;

    let mut cache = Document::new();
    cache.insert("lastMessage", trimmed);
    cache.insert("lastMessageTime", to_bson(&now)?);
    chats
        .update_one(
            doc! { "_id": member_id },
            doc! { "$set": cache, "$inc": { "unreadCount": 1_i64 } },
        )
        .await?;

    let member_name = if chat.member_name.is_empty() {
        "Member".to_string()
    } else {
        chat.member_name.clone()
    };
    let note = Notification {
        id: Uuid::new_v4().to_string(),
        user_id: member_id.to_string(),
        kind: NOTIFICATION_TYPE_CHAT.to_string(),
        message: trimmed.to_string(),
        thread_id: Some(member_id.to_string()),
        chat_type: Some(ChatType::Member),
        appointment_id: None,
        patient_id: None,
        created_at: now,
        read: false,
        metadata: NotificationMetadata {
            sender_id: Some(sender.uid.clone()),
            sender_name: Some(sender.name.clone()),
            patient_name: Some(member_name),
            ..Default::default()
        },
    };
    db.db
        .collection::<Notification>(NOTIFICATIONS_COLLECTION)
        .insert_one(&note)
        .await?;

    Ok(MessageDelivery {
        thread_id: member_id.to_string(),
        chat_type: ChatType::Member,
        message: ChatMessage::from(message),
        recipients: vec![member_id.to_string()],
        notification: Some(note),
    })
}

/// Messages for a thread, newest first, normalized to the display shape no
/// matter which schema variant each document carries.
pub async fn fetch_messages(
    db: &MongoDB,
    thread_id: &str,
    chat_type: ChatType,
) -> Result<Vec<ChatMessage>, ChatError> {
    let mut cursor = match chat_type {
        ChatType::Member => {
            db.db
                .collection::<StoredMessage>(MEMBER_CHAT_MESSAGES_COLLECTION)
                .find(doc! { "memberId": thread_id })
                .sort(doc! { "timestamp": -1 })
                .await?
        }
        ChatType::Appointment => {
            db.db
                .collection::<StoredMessage>(CHAT_MESSAGES_COLLECTION)
                .find(doc! { "threadId": thread_id })
                .sort(doc! { "sentAt": -1 })
                .await?
        }
    };

    let mut messages = Vec::new();
    while let Some(result) = cursor.next().await {
        messages.push(result?.normalize());
    }
    Ok(messages)
}

pub async fn mark_thread_read(
    db: &MongoDB,
    thread_id: &str,
    user_id: &str,
    chat_type: ChatType,
) -> Result<(), ChatError> {
    match chat_type {
        ChatType::Member => {
            // Member side catching up: flip every unread admin message and
            // reset the scalar counter.
            db.db
                .collection::<MemberMessage>(MEMBER_CHAT_MESSAGES_COLLECTION)
                .update_many(
                    doc! { "memberId": thread_id, "senderRole": "admin", "read": false },
                    doc! { "$set": { "read": true } },
                )
                .await?;
            db.db
                .collection::<MemberChat>(MEMBER_CHAT_COLLECTION)
                .update_one(
                    doc! { "_id": thread_id },
                    doc! { "$set": { "unreadCount": 0_i64 } },
                )
                .await?;
        }
        ChatType::Appointment => {
            let mut set_doc = Document::new();
            set_doc.insert(format!("unreadCount.{}", user_id), 0_i64);
            set_doc.insert("updatedAt", to_bson(&Utc::now())?);
            db.db
                .collection::<ChatThread>(CHAT_COLLECTION)
                .update_one(doc! { "_id": thread_id }, doc! { "$set": set_doc })
                .await?;
        }
    }
    Ok(())
}

pub async fn thread_metadata(
    db: &MongoDB,
    thread_id: &str,
    chat_type: ChatType,
) -> Result<Option<ThreadMetadata>, ChatError> {
    match chat_type {
        ChatType::Member => {
            let chat = db
                .db
                .collection::<MemberChat>(MEMBER_CHAT_COLLECTION)
                .find_one(doc! { "_id": thread_id })
                .await?;
            Ok(chat.map(|chat| {
                let summary = MemberChatSummary::from(chat);
                let mut profiles = HashMap::new();
                profiles.insert(
                    summary.member_id.clone(),
                    ParticipantProfile {
                        id: summary.member_id.clone(),
                        name: summary.member_name.clone(),
                        email: None,
                        role: ROLE_PATIENT.to_string(),
                        avatar_url: None,
                    },
                );
                ThreadMetadata {
                    id: summary.id,
                    chat_type: ChatType::Member,
                    appointment_id: None,
                    patient_id: None,
                    member_id: Some(summary.member_id.clone()),
                    member_name: Some(summary.member_name),
                    participants: vec![summary.member_id],
                    participant_profiles: profiles,
                    appointment_meta: None,
                    last_message: summary.last_message,
                    last_sender_id: None,
                    last_message_at: summary.last_message_time,
                    unread_count: UnreadCount::Total(summary.unread_count),
                }
            }))
        }
        ChatType::Appointment => {
            let thread = db
                .db
                .collection::<ChatThread>(CHAT_COLLECTION)
                .find_one(doc! { "_id": thread_id })
                .await?;
            Ok(thread.map(ChatThread::into_metadata))
        }
    }
}

fn error_response(context: &str, err: ChatError) -> HttpResponse {
    match err {
        ChatError::ThreadNotFound(_) => HttpResponse::NotFound().body(err.to_string()),
        ChatError::MissingThreadKeys
        | ChatError::MissingMemberId
        | ChatError::MissingAppointmentContext
        | ChatError::EmptyMessage => HttpResponse::BadRequest().body(err.to_string()),
        ChatError::Database(_) | ChatError::Serialize(_) => {
            error!("{}: {}", context, err);
            HttpResponse::InternalServerError().body(context.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureThreadRequest {
    #[serde(default)]
    pub context: ThreadContext,
    pub sender: SenderProfile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTypeQuery {
    #[serde(default)]
    pub chat_type: Option<ChatType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub text: String,
    pub sender_name: String,
    #[serde(default)]
    pub sender_role: Option<String>,
    #[serde(default)]
    pub chat_type: Option<ChatType>,
    #[serde(default)]
    pub recipient_id: Option<String>,
}

/// POST /chats/threads
pub async fn ensure_thread_handler(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<EnsureThreadRequest>,
) -> impl Responder {
    let user = match auth_user(&req) {
        Some(user) => user,
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    };

    let sender = ChatSenderInfo {
        uid: user.user_id,
        name: payload.sender.name.clone(),
        email: payload.sender.email.clone(),
        role: payload.sender.role.clone().or(Some(user.role)),
    };

    match ensure_thread(&data.mongodb, &payload.context, &sender).await {
        Ok(metadata) => HttpResponse::Ok().json(metadata),
        Err(e) => error_response("Error resolving chat thread", e),
    }
}

/// GET /chats/threads/{thread_id}
pub async fn get_thread(
    req: HttpRequest,
    data: web::Data<AppState>,
    thread_id: web::Path<String>,
    query: web::Query<ChatTypeQuery>,
) -> impl Responder {
    if auth_user(&req).is_none() {
        return HttpResponse::Unauthorized().body("Unauthorized");
    }
    let chat_type = query.chat_type.unwrap_or_default();
    match thread_metadata(&data.mongodb, &thread_id, chat_type).await {
        Ok(Some(metadata)) => HttpResponse::Ok().json(metadata),
        Ok(None) => HttpResponse::NotFound().body("Chat thread not found"),
        Err(e) => error_response("Error fetching chat thread", e),
    }
}

/// GET /chats/user/{user_id}: appointment threads the user participates in.
pub async fn get_user_threads(
    req: HttpRequest,
    data: web::Data<AppState>,
    user_id: web::Path<String>,
) -> impl Responder {
    let user = match auth_user(&req) {
        Some(user) => user,
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    };
    if user.user_id != *user_id && !user.is_staff() {
        return HttpResponse::Unauthorized().body("Cannot access other user's chats");
    }

    let threads = data
        .mongodb
        .db
        .collection::<ChatThread>(CHAT_COLLECTION);
    let mut cursor = match threads
        .find(doc! { "participants": &*user_id })
        .sort(doc! { "updatedAt": -1 })
        .await
    {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching chat threads: {}", e);
            return HttpResponse::InternalServerError().body("Error fetching chat threads");
        }
    };

    let mut out = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(thread) => out.push(thread.into_metadata()),
            Err(e) => {
                error!("Error iterating chat threads: {}", e);
                return HttpResponse::InternalServerError().body("Error iterating chat threads");
            }
        }
    }
    HttpResponse::Ok().json(out)
}

/// GET /chats/member: staff directory of member chats, most recent first.
pub async fn list_member_chats(req: HttpRequest, data: web::Data<AppState>) -> impl Responder {
    match auth_user(&req) {
        Some(user) if user.is_staff() => {}
        Some(_) => return HttpResponse::Unauthorized().body("Staff only"),
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    }

    let chats = data
        .mongodb
        .db
        .collection::<MemberChat>(MEMBER_CHAT_COLLECTION);
    let mut cursor = match chats
        .find(doc! {})
        .sort(doc! { "lastMessageTime": -1 })
        .await
    {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching member chats: {}", e);
            return HttpResponse::InternalServerError().body("Error fetching member chats");
        }
    };

    let mut out: Vec<MemberChatSummary> = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(chat) => out.push(chat.into()),
            Err(e) => {
                error!("Error iterating member chats: {}", e);
                return HttpResponse::InternalServerError().body("Error iterating member chats");
            }
        }
    }
    HttpResponse::Ok().json(out)
}

/// POST /chats/{thread_id}/read
pub async fn mark_thread_read_handler(
    req: HttpRequest,
    data: web::Data<AppState>,
    thread_id: web::Path<String>,
    query: web::Query<ChatTypeQuery>,
) -> impl Responder {
    let user = match auth_user(&req) {
        Some(user) => user,
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    };
    let chat_type = query.chat_type.unwrap_or_default();
    match mark_thread_read(&data.mongodb, &thread_id, &user.user_id, chat_type).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "status": "read" })),
        Err(e) => error_response("Error marking thread read", e),
    }
}

/// GET /messages/{thread_id}
pub async fn get_messages(
    req: HttpRequest,
    data: web::Data<AppState>,
    thread_id: web::Path<String>,
    query: web::Query<ChatTypeQuery>,
) -> impl Responder {
    if auth_user(&req).is_none() {
        return HttpResponse::Unauthorized().body("Unauthorized");
    }
    let chat_type = query.chat_type.unwrap_or_default();
    match fetch_messages(&data.mongodb, &thread_id, chat_type).await {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => error_response("Error fetching messages", e),
    }
}

/// POST /messages/{thread_id}
pub async fn send_message(
    req: HttpRequest,
    data: web::Data<AppState>,
    thread_id: web::Path<String>,
    query: web::Query<ChatTypeQuery>,
    payload: web::Json<SendMessageRequest>,
) -> impl Responder {
    let user = match auth_user(&req) {
        Some(user) => user,
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    };

    let sender = ChatSenderInfo {
        uid: user.user_id,
        name: payload.sender_name.clone(),
        email: None,
        role: payload.sender_role.clone().or(Some(user.role)),
    };

    let delivery = match query.chat_type.or(payload.chat_type).unwrap_or_default() {
        ChatType::Member => deliver_member_message(&data.mongodb, &thread_id, &sender, &payload.text).await,
        ChatType::Appointment => {
            deliver_appointment_message(
                &data.mongodb,
                &thread_id,
                &sender,
                &payload.text,
                payload.recipient_id.as_deref(),
            )
            .await
        }
    };

    match delivery {
        Ok(delivery) => {
            data.chat_server.do_send(BroadcastMessage {
                thread_id: delivery.thread_id.clone(),
                chat_type: delivery.chat_type,
                recipients: delivery.recipients.clone(),
                message: delivery.message.clone(),
            });
            if let Some(note) = delivery.notification.clone() {
                data.chat_server.do_send(BroadcastNotification { notification: note });
            }
            HttpResponse::Ok().json(&delivery.message)
        }
        Err(e) => error_response("Error sending message", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    fn thread_with(
        patient_id: Option<&str>,
        participants: Vec<&str>,
    ) -> ChatThread {
        ChatThread {
            id: "apt-1_pat-1".to_string(),
            appointment_id: Some("apt-1".to_string()),
            patient_id: patient_id.map(String::from),
            participants: participants.into_iter().map(String::from).collect(),
            participant_profiles: HashMap::new(),
            appointment_meta: AppointmentMeta::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_message: String::new(),
            last_sender_id: String::new(),
            last_message_at: None,
            unread_count: HashMap::new(),
        }
    }

    #[test]
    fn thread_id_is_deterministic() {
        let a = build_thread_id(Some("apt-9"), Some("pat-3")).unwrap();
        let b = build_thread_id(Some("apt-9"), Some("pat-3")).unwrap();
        assert_eq!(a, "apt-9_pat-3");
        assert_eq!(a, b);
    }

    #[test]
    fn thread_id_requires_both_parts() {
        assert!(matches!(
            build_thread_id(None, Some("pat-3")),
            Err(ChatError::MissingThreadKeys)
        ));
        assert!(matches!(
            build_thread_id(Some("apt-9"), None),
            Err(ChatError::MissingThreadKeys)
        ));
        assert!(matches!(
            build_thread_id(Some(""), Some("pat-3")),
            Err(ChatError::MissingThreadKeys)
        ));
    }

    #[test]
    fn recipient_prefers_explicit_hint() {
        let thread = thread_with(Some("pat-1"), vec!["staff-1", "pat-1"]);
        assert_eq!(
            resolve_recipient(&thread, "staff-1", Some("pat-9")),
            Some("pat-9".to_string())
        );
    }

    #[test]
    fn recipient_falls_back_to_patient_then_participant() {
        let thread = thread_with(Some("pat-1"), vec!["staff-1", "pat-1"]);
        assert_eq!(
            resolve_recipient(&thread, "staff-1", None),
            Some("pat-1".to_string())
        );

        let no_patient = thread_with(None, vec!["staff-1", "staff-2"]);
        assert_eq!(
            resolve_recipient(&no_patient, "staff-1", None),
            Some("staff-2".to_string())
        );
    }

    #[test]
    fn recipient_is_never_the_sender() {
        // Patient replying on their own thread: the hint and the patient id
        // both point at the sender and must be skipped.
        let thread = thread_with(Some("pat-1"), vec!["staff-1", "pat-1"]);
        assert_eq!(
            resolve_recipient(&thread, "pat-1", Some("pat-1")),
            Some("staff-1".to_string())
        );

        let lonely = thread_with(Some("pat-1"), vec!["pat-1"]);
        assert_eq!(resolve_recipient(&lonely, "pat-1", None), None);
    }

    #[test]
    fn participants_are_deduped_in_order() {
        let participants = dedup_participants(vec![
            Some("staff-1".to_string()),
            Some("pat-1".to_string()),
            Some("staff-1".to_string()),
            None,
            Some(String::new()),
        ]);
        assert_eq!(participants, vec!["staff-1".to_string(), "pat-1".to_string()]);
    }

    #[test]
    fn chat_errors_map_to_http_statuses() {
        assert_eq!(
            error_response(
                "Error sending message",
                ChatError::ThreadNotFound("apt-1_pat-1".to_string()),
            )
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response("Error sending message", ChatError::EmptyMessage).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response("Error resolving chat thread", ChatError::MissingMemberId).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[actix_web::test]
    async fn blank_message_is_rejected_before_any_write() {
        // The trim check runs before the thread lookup, so no database
        // connection is attempted here.
        let db = MongoDB::init("mongodb://localhost:27017", "clinic_test").await;
        let sender = ChatSenderInfo {
            uid: "staff-1".to_string(),
            name: "Front Desk".to_string(),
            email: None,
            role: Some(ROLE_SECRETARY.to_string()),
        };

        let err = deliver_appointment_message(&db, "apt-1_pat-1", &sender, "   \n\t", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));

        let err = deliver_member_message(&db, "member-1", &sender, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
    }
}
