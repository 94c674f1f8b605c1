// src/user_management.rs
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use futures_util::StreamExt;
use log::error;
use mongodb::bson::doc;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{auth_user, PublicUser, User};
use crate::db::USERS_COLLECTION;

#[derive(Debug, Deserialize)]
pub struct FindUserQuery {
    pub query: String,
}

/// GET /users/find_user_email?query= : staff lookup by email or name, used
/// when opening a chat with a patient who has no thread yet.
pub async fn find_user_email(
    req: HttpRequest,
    query: web::Query<FindUserQuery>,
    data: web::Data<AppState>,
) -> impl Responder {
    match auth_user(&req) {
        Some(user) if user.is_staff() => {}
        Some(_) => return HttpResponse::Unauthorized().body("Staff only"),
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    }

    let users_collection = data.mongodb.db.collection::<User>(USERS_COLLECTION);
    let filter = doc! {
        "$or": [
            { "email": { "$regex": &query.query, "$options": "i" } },
            { "name": { "$regex": &query.query, "$options": "i" } },
        ]
    };

    let mut cursor = match users_collection.find(filter).await {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching users: {}", e);
            return HttpResponse::InternalServerError().body("Error fetching users");
        }
    };

    let mut users: Vec<PublicUser> = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(user) => users.push(user.into()),
            Err(e) => {
                error!("Error iterating users: {}", e);
                return HttpResponse::InternalServerError().body("Error iterating users");
            }
        }
    }

    HttpResponse::Ok().json(users)
}

/// GET /users/get/{id}
pub async fn get_user_by_id(
    req: HttpRequest,
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> impl Responder {
    if auth_user(&req).is_none() {
        return HttpResponse::Unauthorized().body("Unauthorized");
    }

    let users_collection = data.mongodb.db.collection::<User>(USERS_COLLECTION);
    match users_collection.find_one(doc! { "_id": &*path }).await {
        Ok(Some(user)) => HttpResponse::Ok().json(PublicUser::from(user)),
        Ok(None) => HttpResponse::NotFound().body("User not found"),
        Err(e) => {
            error!("Error fetching user: {}", e);
            HttpResponse::InternalServerError().body("Error fetching user")
        }
    }
}
