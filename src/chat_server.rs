// src/chat_server.rs
use actix::prelude::*;
use log::{error, info};
use std::collections::HashMap;
use std::sync::Arc;

use crate::chat::{
    deliver_appointment_message, deliver_member_message, mark_thread_read, ChatSenderInfo,
    MessageDelivery,
};
use crate::db::MongoDB;
use crate::models::message::ChatMessage;
use crate::models::notification::Notification;
use crate::models::thread::ChatType;

#[derive(Message, Clone)]
#[rtype(result = "()")]
pub enum WsMessage {
    Chat {
        thread_id: String,
        chat_type: ChatType,
        message: ChatMessage,
    },
    Notification(Notification),
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub user_id: String,
    pub addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub user_id: String,
    pub addr: Recipient<WsMessage>,
}

/// Push an already-persisted message to its recipients. Used by the REST
/// send path after the delivery chain has run.
#[derive(Message)]
#[rtype(result = "()")]
pub struct BroadcastMessage {
    pub thread_id: String,
    pub chat_type: ChatType,
    pub recipients: Vec<String>,
    pub message: ChatMessage,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct BroadcastNotification {
    pub notification: Notification,
}

/// A send arriving over the socket itself. Runs the same delivery chain as
/// the REST path, then fans out.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SendChatMessage {
    pub thread_id: String,
    pub chat_type: ChatType,
    pub sender: ChatSenderInfo,
    pub text: String,
    pub recipient_hint: Option<String>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct MarkThreadRead {
    pub thread_id: String,
    pub chat_type: ChatType,
    pub user_id: String,
}

pub struct ChatServer {
    // Multiple connections per user (several tabs, phone + desktop).
    sessions: HashMap<String, Vec<Recipient<WsMessage>>>,
    db: Arc<MongoDB>,
}

impl ChatServer {
    pub fn new(db: Arc<MongoDB>) -> Self {
        ChatServer {
            sessions: HashMap::new(),
            db,
        }
    }
}

fn send_to_user(
    sessions: &HashMap<String, Vec<Recipient<WsMessage>>>,
    user_id: &str,
    event: &WsMessage,
) {
    if let Some(addrs) = sessions.get(user_id) {
        for addr in addrs {
            addr.do_send(event.clone());
        }
    }
}

fn fan_out(
    sessions: &HashMap<String, Vec<Recipient<WsMessage>>>,
    delivery: &MessageDelivery,
    echo_to: Option<&str>,
) {
    let event = WsMessage::Chat {
        thread_id: delivery.thread_id.clone(),
        chat_type: delivery.chat_type,
        message: delivery.message.clone(),
    };
    for user_id in &delivery.recipients {
        send_to_user(sessions, user_id, &event);
    }
    // Echo to the sender's other open connections so every tab renders it.
    if let Some(sender_id) = echo_to {
        if !delivery.recipients.iter().any(|r| r == sender_id) {
            send_to_user(sessions, sender_id, &event);
        }
    }
    if let Some(note) = &delivery.notification {
        send_to_user(
            sessions,
            &note.user_id,
            &WsMessage::Notification(note.clone()),
        );
    }
}

impl Actor for ChatServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!("User {} connected (WS)", msg.user_id);
        self.sessions
            .entry(msg.user_id.clone())
            .or_default()
            .push(msg.addr);
    }
}

impl Handler<Disconnect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        info!("User {} disconnected (WS)", msg.user_id);
        if let Some(addrs) = self.sessions.get_mut(&msg.user_id) {
            // Remove only the connection that matches the provided address.
            addrs.retain(|a| a != &msg.addr);
            if addrs.is_empty() {
                self.sessions.remove(&msg.user_id);
            }
        }
    }
}

impl Handler<BroadcastMessage> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: BroadcastMessage, _: &mut Context<Self>) {
        let event = WsMessage::Chat {
            thread_id: msg.thread_id,
            chat_type: msg.chat_type,
            message: msg.message,
        };
        for user_id in &msg.recipients {
            send_to_user(&self.sessions, user_id, &event);
        }
    }
}

impl Handler<BroadcastNotification> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: BroadcastNotification, _: &mut Context<Self>) {
        let user_id = msg.notification.user_id.clone();
        send_to_user(
            &self.sessions,
            &user_id,
            &WsMessage::Notification(msg.notification),
        );
    }
}

impl Handler<SendChatMessage> for ChatServer {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, msg: SendChatMessage, _: &mut Context<Self>) -> Self::Result {
        let db = self.db.clone();
        let sessions_map = self.sessions.clone();
        Box::pin(async move {
            let delivery = match msg.chat_type {
                ChatType::Member => {
                    deliver_member_message(&db, &msg.thread_id, &msg.sender, &msg.text).await
                }
                ChatType::Appointment => {
                    deliver_appointment_message(
                        &db,
                        &msg.thread_id,
                        &msg.sender,
                        &msg.text,
                        msg.recipient_hint.as_deref(),
                    )
                    .await
                }
            };
            match delivery {
                Ok(delivery) => fan_out(&sessions_map, &delivery, Some(&msg.sender.uid)),
                Err(e) => error!("Error delivering websocket message: {}", e),
            }
        })
    }
}

impl Handler<MarkThreadRead> for ChatServer {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, msg: MarkThreadRead, _: &mut Context<Self>) -> Self::Result {
        let db = self.db.clone();
        Box::pin(async move {
            if let Err(e) =
                mark_thread_read(&db, &msg.thread_id, &msg.user_id, msg.chat_type).await
            {
                error!("Error marking thread read over websocket: {}", e);
            }
        })
    }
}
