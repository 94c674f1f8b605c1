// src/app_state.rs
use crate::chat_server::ChatServer;
use crate::config::Config;
use crate::db::MongoDB;
use crate::email::SmtpMailer;
use actix::Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub chat_server: Addr<ChatServer>,
    pub mongodb: Arc<MongoDB>,
    pub mailer: SmtpMailer,
    pub config: Config,
}
