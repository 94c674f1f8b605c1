// src/appointment.rs
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::StreamExt;
use log::error;
use mongodb::bson::{doc, to_bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::auth_user;
use crate::chat_server::BroadcastNotification;
use crate::db::APPOINTMENTS_COLLECTION;
use crate::models::notification::{
    Notification, NotificationMetadata, NOTIFICATION_TYPE_APPOINTMENT,
};
use crate::notifications::push_notification;

pub const STATUS_PENDING: &str = "Pending";
pub const STATUS_CONFIRMED: &str = "Confirmed";
pub const STATUS_DECLINED: &str = "Declined";
pub const STATUS_COMPLETED: &str = "Completed";
pub const STATUS_CANCELLED: &str = "Cancelled";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(rename = "_id")]
    pub id: String,
    pub patient_id: String,
    pub patient_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_email: Option<String>,
    pub date: String,
    pub time: String,
    pub service: String,
    #[serde(default)]
    pub sub_services: Vec<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_from: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn valid_status(status: &str) -> bool {
    matches!(
        status,
        STATUS_PENDING | STATUS_CONFIRMED | STATUS_DECLINED | STATUS_COMPLETED | STATUS_CANCELLED
    )
}

/// Appointment dates are plain `YYYY-MM-DD` strings in the database, so they
/// are validated at the boundary instead of trusting the client.
pub fn valid_date(date: &str) -> bool {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    #[serde(default)]
    pub patient_id: Option<String>,
    pub patient_name: String,
    #[serde(default)]
    pub patient_email: Option<String>,
    pub date: String,
    pub time: String,
    pub service: String,
    #[serde(default)]
    pub sub_services: Vec<String>,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub follow_up_from: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

/// POST /appointments: booking lands as Pending no matter what the client
/// claims; staff move it through the status flow afterwards.
pub async fn create_appointment(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateAppointmentRequest>,
) -> impl Responder {
    let user = match auth_user(&req) {
        Some(user) => user,
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    };

    // Patients book for themselves; staff may book on a patient's behalf.
    let patient_id = match payload.patient_id.clone().filter(|id| !id.is_empty()) {
        Some(id) if id != user.user_id && !user.is_staff() => {
            return HttpResponse::Unauthorized().body("Cannot book for another patient");
        }
        Some(id) => id,
        None => user.user_id.clone(),
    };

    if !valid_date(&payload.date) {
        return HttpResponse::BadRequest().body("Invalid date, expected YYYY-MM-DD");
    }
    if payload.time.trim().is_empty() {
        return HttpResponse::BadRequest().body("Missing appointment time");
    }
    if payload.service.trim().is_empty() {
        return HttpResponse::BadRequest().body("Missing appointment service");
    }

    let now = Utc::now();
    let appointment = Appointment {
        id: Uuid::new_v4().to_string(),
        patient_id,
        patient_name: payload.patient_name.clone(),
        patient_email: payload.patient_email.clone(),
        date: payload.date.clone(),
        time: payload.time.clone(),
        service: payload.service.clone(),
        sub_services: payload.sub_services.clone(),
        status: STATUS_PENDING.to_string(),
        reason: None,
        remarks: payload.remarks.clone(),
        completion_time: None,
        follow_up_from: payload.follow_up_from.clone(),
        created_at: now,
        updated_at: now,
    };

    let collection = data
        .mongodb
        .db
        .collection::<Appointment>(APPOINTMENTS_COLLECTION);
    match collection.insert_one(&appointment).await {
        Ok(_) => HttpResponse::Ok().json(appointment),
        Err(e) => {
            error!("Error creating appointment: {}", e);
            HttpResponse::InternalServerError().body("Error creating appointment")
        }
    }
}

/// GET /appointments?status=&date= is the staff schedule view.
pub async fn list_appointments(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<AppointmentListQuery>,
) -> impl Responder {
    match auth_user(&req) {
        Some(user) if user.is_staff() => {}
        Some(_) => return HttpResponse::Unauthorized().body("Staff only"),
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    }

    let mut filter = Document::new();
    if let Some(status) = query.status.clone().filter(|s| !s.is_empty()) {
        if !valid_status(&status) {
            return HttpResponse::BadRequest().body("Unknown appointment status");
        }
        filter.insert("status", status);
    }
    if let Some(date) = query.date.clone().filter(|d| !d.is_empty()) {
        if !valid_date(&date) {
            return HttpResponse::BadRequest().body("Invalid date, expected YYYY-MM-DD");
        }
        filter.insert("date", date);
    }

    let collection = data
        .mongodb
        .db
        .collection::<Appointment>(APPOINTMENTS_COLLECTION);
    let mut cursor = match collection
        .find(filter)
        .sort(doc! { "date": 1, "time": 1 })
        .await
    {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching appointments: {}", e);
            return HttpResponse::InternalServerError().body("Error fetching appointments");
        }
    };

    let mut appointments = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(appointment) => appointments.push(appointment),
            Err(e) => {
                error!("Error iterating appointments: {}", e);
                return HttpResponse::InternalServerError().body("Error iterating appointments");
            }
        }
    }
    HttpResponse::Ok().json(appointments)
}

/// GET /appointments/patient/{patient_id}, a patient's own history.
pub async fn get_patient_appointments(
    req: HttpRequest,
    data: web::Data<AppState>,
    patient_id: web::Path<String>,
) -> impl Responder {
    let user = match auth_user(&req) {
        Some(user) => user,
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    };
    if user.user_id != *patient_id && !user.is_staff() {
        return HttpResponse::Unauthorized().body("Cannot access other patient's appointments");
    }

    let collection = data
        .mongodb
        .db
        .collection::<Appointment>(APPOINTMENTS_COLLECTION);
    let mut cursor = match collection
        .find(doc! { "patientId": &*patient_id })
        .sort(doc! { "date": -1, "time": -1 })
        .await
    {
        Ok(cursor) => cursor,
        Err(e) => {
            error!("Error fetching patient appointments: {}", e);
            return HttpResponse::InternalServerError().body("Error fetching patient appointments");
        }
    };

    let mut appointments = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(appointment) => appointments.push(appointment),
            Err(e) => {
                error!("Error iterating patient appointments: {}", e);
                return HttpResponse::InternalServerError()
                    .body("Error iterating patient appointments");
            }
        }
    }
    HttpResponse::Ok().json(appointments)
}

/// GET /appointments/{id}
pub async fn get_appointment(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
) -> impl Responder {
    let user = match auth_user(&req) {
        Some(user) => user,
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    };

    let collection = data
        .mongodb
        .db
        .collection::<Appointment>(APPOINTMENTS_COLLECTION);
    match collection.find_one(doc! { "_id": &*id }).await {
        Ok(Some(appointment)) => {
            if appointment.patient_id != user.user_id && !user.is_staff() {
                return HttpResponse::Unauthorized().body("Cannot access this appointment");
            }
            HttpResponse::Ok().json(appointment)
        }
        Ok(None) => HttpResponse::NotFound().body("Appointment not found"),
        Err(e) => {
            error!("Error fetching appointment: {}", e);
            HttpResponse::InternalServerError().body("Error fetching appointment")
        }
    }
}

/// PUT /appointments/{id}/status: staff move an appointment through its
/// lifecycle. Writes a notification for the patient and pushes it over the
/// socket; the confirmation email is a separate call the client makes to
/// POST /appointment/sendEmail.
pub async fn update_appointment_status(
    req: HttpRequest,
    data: web::Data<AppState>,
    id: web::Path<String>,
    payload: web::Json<UpdateStatusRequest>,
) -> impl Responder {
    match auth_user(&req) {
        Some(user) if user.is_staff() => {}
        Some(_) => return HttpResponse::Unauthorized().body("Staff only"),
        None => return HttpResponse::Unauthorized().body("Unauthorized"),
    }

    if !valid_status(&payload.status) {
        return HttpResponse::BadRequest().body("Unknown appointment status");
    }

    let collection = data
        .mongodb
        .db
        .collection::<Appointment>(APPOINTMENTS_COLLECTION);
    let appointment = match collection.find_one(doc! { "_id": &*id }).await {
        Ok(Some(appointment)) => appointment,
        Ok(None) => return HttpResponse::NotFound().body("Appointment not found"),
        Err(e) => {
            error!("Error fetching appointment: {}", e);
            return HttpResponse::InternalServerError().body("Error fetching appointment");
        }
    };

    let now = Utc::now();
    let mut set_doc = Document::new();
    set_doc.insert("status", payload.status.as_str());
    // A reason only makes sense when the appointment is being turned down.
    if matches!(
        payload.status.as_str(),
        STATUS_DECLINED | STATUS_CANCELLED
    ) {
        if let Some(reason) = payload.reason.clone().filter(|r| !r.trim().is_empty()) {
            set_doc.insert("reason", reason);
        }
    }
    if let Some(remarks) = payload.remarks.clone().filter(|r| !r.trim().is_empty()) {
        set_doc.insert("remarks", remarks);
    }
    if payload.status == STATUS_COMPLETED {
        match to_bson(&now) {
            Ok(bson) => {
                set_doc.insert("completionTime", bson);
            }
            Err(e) => {
                error!("Error serializing completion time: {}", e);
                return HttpResponse::InternalServerError().body("Error updating appointment");
            }
        }
    }
    match to_bson(&now) {
        Ok(bson) => {
            set_doc.insert("updatedAt", bson);
        }
        Err(e) => {
            error!("Error serializing update time: {}", e);
            return HttpResponse::InternalServerError().body("Error updating appointment");
        }
    }

    if let Err(e) = collection
        .update_one(doc! { "_id": &*id }, doc! { "$set": set_doc })
        .await
    {
        error!("Error updating appointment status: {}", e);
        return HttpResponse::InternalServerError().body("Error updating appointment status");
    }

    let note = Notification {
        id: Uuid::new_v4().to_string(),
        user_id: appointment.patient_id.clone(),
        kind: NOTIFICATION_TYPE_APPOINTMENT.to_string(),
        message: format!(
            "Your appointment on {} at {} has been {}.",
            appointment.date, appointment.time, payload.status
        ),
        thread_id: None,
        chat_type: None,
        appointment_id: Some(appointment.id.clone()),
        patient_id: Some(appointment.patient_id.clone()),
        created_at: now,
        read: false,
        metadata: NotificationMetadata {
            appointment_date: Some(appointment.date.clone()),
            appointment_time: Some(appointment.time.clone()),
            patient_name: Some(appointment.patient_name.clone()),
            status: Some(payload.status.clone()),
            ..Default::default()
        },
    };
    if let Err(e) = push_notification(&data.mongodb, &note).await {
        // The status change itself succeeded, so report it and move on.
        error!("Error writing status notification: {}", e);
    } else {
        data.chat_server
            .do_send(BroadcastNotification { notification: note });
    }

    match collection.find_one(doc! { "_id": &*id }).await {
        Ok(Some(updated)) => HttpResponse::Ok().json(updated),
        Ok(None) => HttpResponse::Ok().json(json!({ "status": "updated" })),
        Err(e) => {
            error!("Error reloading appointment: {}", e);
            HttpResponse::Ok().json(json!({ "status": "updated" }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_values_are_closed_set() {
        for status in [
            STATUS_PENDING,
            STATUS_CONFIRMED,
            STATUS_DECLINED,
            STATUS_COMPLETED,
            STATUS_CANCELLED,
        ] {
            assert!(valid_status(status));
        }
        assert!(!valid_status("Rescheduled"));
        assert!(!valid_status("pending"));
        assert!(!valid_status(""));
    }

    #[test]
    fn date_must_be_iso_like() {
        assert!(valid_date("2025-01-31"));
        assert!(!valid_date("2025-02-30"));
        assert!(!valid_date("31-01-2025"));
        assert!(!valid_date("2025/01/31"));
        assert!(!valid_date("next tuesday"));
    }
}
