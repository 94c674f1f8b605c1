// src/notifications.rs
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use futures_util::StreamExt;
use log::error;
use mongodb::bson::doc;
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::auth_user;
use crate::db::{MongoDB, NOTIFICATIONS_COLLECTION};
use crate::models::notification::Notification;

/// Persist a notification. Chat delivery and appointment status changes both
/// funnel through here (or insert the same shape directly).
pub async fn push_notification(
    db: &MongoDB,
    notification: &Notification,
) -> Result<(), mongodb::error::Error> {
    db.db
        .collection::<Notification>(NOTIFICATIONS_COLLECTION)
        .insert_one(notification)
        .await?;
    Ok(())
}

/// GET /notifications/{user_id}, newest first.
pub async fn get_notifications(
    req: HttpRequest,
    data: web::Data<AppState>,
    user_id: web::Path<String>,
) -> impl Responder {
    let user = match auth_user(&req) {
        Some(user) => user,
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    };
    if user.user_id != *user_id && !user.is_staff() {
        return HttpResponse::Unauthorized().body("Cannot access other user's notifications");
    }

    let collection = data
        .mongodb
        .db
        .collection::<Notification>(NOTIFICATIONS_COLLECTION);
    let mut cursor = match collection
        .find(doc! { "userId": &*user_id })
        .sort(doc! { "createdAt": -1 })
        .await
    {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching notifications: {}", e);
            return HttpResponse::InternalServerError().body("Error fetching notifications");
        }
    };

    let mut notifications = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(notification) => notifications.push(notification),
            Err(e) => {
                error!("Error iterating notifications: {}", e);
                return HttpResponse::InternalServerError().body("Error iterating notifications");
            }
        }
    }
    HttpResponse::Ok().json(notifications)
}

/// POST /notifications/{id}/read
pub async fn mark_notification_read(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> impl Responder {
    if auth_user(&req).is_none() {
        return HttpResponse::Unauthorized().body("Unauthorized");
    }

    let collection = data
        .mongodb
        .db
        .collection::<Notification>(NOTIFICATIONS_COLLECTION);
    match collection
        .update_one(doc! { "_id": &*id }, doc! { "$set": { "read": true } })
        .await
    {
        Ok(result) if result.matched_count == 0 => {
            HttpResponse::NotFound().body("Notification not found")
        }
        Ok(_) => HttpResponse::Ok().json(json!({ "status": "read" })),
        Err(e) => {
            error!("Error marking notification read: {}", e);
            HttpResponse::InternalServerError().body("Error marking notification read")
        }
    }
}

/// POST /notifications/{user_id}/read_all
pub async fn mark_all_notifications_read(
    req: HttpRequest,
    data: web::Data<AppState>,
    user_id: web::Path<String>,
) -> impl Responder {
    let user = match auth_user(&req) {
        Some(user) => user,
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    };
    if user.user_id != *user_id && !user.is_staff() {
        return HttpResponse::Unauthorized().body("Cannot update other user's notifications");
    }

    let collection = data
        .mongodb
        .db
        .collection::<Notification>(NOTIFICATIONS_COLLECTION);
    match collection
        .update_many(
            doc! { "userId": &*user_id, "read": false },
            doc! { "$set": { "read": true } },
        )
        .await
    {
        Ok(result) => HttpResponse::Ok().json(json!({
            "status": "read",
            "updated": result.modified_count,
        })),
        Err(e) => {
            error!("Error marking notifications read: {}", e);
            HttpResponse::InternalServerError().body("Error marking notifications read")
        }
    }
}
