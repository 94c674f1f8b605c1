use mongodb::{options::ClientOptions, Client, Database};

/// Collection names, kept exactly as the clinic frontend knows them.
/// Firestore subcollections (`.../messages`) are flattened into sibling
/// collections that carry the parent key as a field.
pub const USERS_COLLECTION: &str = "users";
pub const APPOINTMENTS_COLLECTION: &str = "appointments";
pub const CHAT_COLLECTION: &str = "appointmentChats";
pub const CHAT_MESSAGES_COLLECTION: &str = "appointmentChatMessages";
pub const MEMBER_CHAT_COLLECTION: &str = "chats";
pub const MEMBER_CHAT_MESSAGES_COLLECTION: &str = "chatMessages";
pub const NOTIFICATIONS_COLLECTION: &str = "notifications";

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> Self {
        let client_options = ClientOptions::parse(uri)
            .await
            .expect("Failed to parse MongoDB connection string");
        let client = Client::with_options(client_options).expect("Failed to initialize client");
        let db = client.database(db_name);
        MongoDB { client, db }
    }
}
