// src/web_socket_server.rs
use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{error, warn};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

use crate::app_state::AppState;
use crate::chat::ChatSenderInfo;
use crate::chat_server::{
    ChatServer, Connect, Disconnect, MarkThreadRead, SendChatMessage, WsMessage,
};
use crate::models::thread::ChatType;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// GET /ws?userId=... upgrades to a WebSocket session for that user.
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
    query: web::Query<WsQuery>,
) -> Result<HttpResponse, Error> {
    let user_id = match query.user_id.clone().filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => return Ok(HttpResponse::BadRequest().body("Missing userId query parameter")),
    };
    ws::start(
        WebSocketConnection::new(user_id, data.chat_server.clone()),
        &req,
        stream,
    )
}

/// What a connected client may ask for over the socket.
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    SendMessage {
        thread_id: String,
        #[serde(default)]
        chat_type: Option<ChatType>,
        text: String,
        sender_name: String,
        #[serde(default)]
        sender_role: Option<String>,
        #[serde(default)]
        recipient_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MarkRead {
        thread_id: String,
        #[serde(default)]
        chat_type: Option<ChatType>,
    },
}

pub struct WebSocketConnection {
    pub user_id: String,
    pub hb: Instant,
    pub addr: Addr<ChatServer>,
}

impl WebSocketConnection {
    pub fn new(user_id: String, addr: Addr<ChatServer>) -> Self {
        WebSocketConnection {
            user_id,
            hb: Instant::now(),
            addr,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(Duration::from_secs(5), |act, ctx| {
            if Instant::now().duration_since(act.hb) > Duration::from_secs(10) {
                warn!("WebSocket client heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WebSocketConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let addr = ctx.address();
        self.addr
            .send(Connect {
                user_id: self.user_id.clone(),
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, _act, ctx| {
                if res.is_err() {
                    error!("Failed to register websocket session with chat server");
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.addr.do_send(Disconnect {
            user_id: self.user_id.clone(),
            addr: ctx.address().recipient(),
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WebSocketConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::SendMessage {
                    thread_id,
                    chat_type,
                    text: body,
                    sender_name,
                    sender_role,
                    recipient_id,
                }) => {
                    self.addr.do_send(SendChatMessage {
                        thread_id,
                        chat_type: chat_type.unwrap_or_default(),
                        sender: ChatSenderInfo {
                            uid: self.user_id.clone(),
                            name: sender_name,
                            email: None,
                            role: sender_role,
                        },
                        text: body,
                        recipient_hint: recipient_id,
                    });
                }
                Ok(ClientEvent::MarkRead {
                    thread_id,
                    chat_type,
                }) => {
                    self.addr.do_send(MarkThreadRead {
                        thread_id,
                        chat_type: chat_type.unwrap_or_default(),
                        user_id: self.user_id.clone(),
                    });
                }
                Err(e) => {
                    warn!("Failed to parse websocket message: {}", e);
                }
            },
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<WsMessage> for WebSocketConnection {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let payload = match msg {
            WsMessage::Chat {
                thread_id,
                chat_type,
                message,
            } => json!({
                "event": "chatMessage",
                "threadId": thread_id,
                "chatType": chat_type,
                "message": message,
            }),
            WsMessage::Notification(notification) => json!({
                "event": "notification",
                "notification": notification,
            }),
        };
        ctx.text(payload.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_send_message_parses_camel_case() {
        let raw = r#"{
            "action": "sendMessage",
            "threadId": "apt-1_pat-1",
            "chatType": "appointment",
            "text": "hello",
            "senderName": "Dr. Cruz",
            "recipientId": "pat-1"
        }"#;
        match serde_json::from_str::<ClientEvent>(raw) {
            Ok(ClientEvent::SendMessage {
                thread_id,
                chat_type,
                text,
                sender_name,
                recipient_id,
                ..
            }) => {
                assert_eq!(thread_id, "apt-1_pat-1");
                assert_eq!(chat_type, Some(ChatType::Appointment));
                assert_eq!(text, "hello");
                assert_eq!(sender_name, "Dr. Cruz");
                assert_eq!(recipient_id.as_deref(), Some("pat-1"));
            }
            other => panic!("unexpected parse result: {:?}", other.is_ok()),
        }
    }

    #[test]
    fn client_mark_read_defaults_chat_type() {
        let raw = r#"{ "action": "markRead", "threadId": "member-7" }"#;
        match serde_json::from_str::<ClientEvent>(raw) {
            Ok(ClientEvent::MarkRead {
                thread_id,
                chat_type,
            }) => {
                assert_eq!(thread_id, "member-7");
                assert_eq!(chat_type.unwrap_or_default(), ChatType::Appointment);
            }
            other => panic!("unexpected parse result: {:?}", other.is_ok()),
        }
    }
}
