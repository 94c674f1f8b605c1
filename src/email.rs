// src/email.rs
//
// Appointment status emails. The payload is validated in full before any
// SMTP work happens so a bad request can never cost a connection attempt.

use actix_web::{web, HttpResponse, Responder};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::app_state::AppState;
use crate::appointment::STATUS_DECLINED;

pub type SmtpMailer = AsyncSmtpTransport<Tokio1Executor>;

pub fn build_mailer(
    host: &str,
    username: &str,
    password: &str,
) -> Result<SmtpMailer, lettre::transport::smtp::Error> {
    let credentials = Credentials::new(username.to_string(), password.to_string());
    Ok(AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
        .credentials(credentials)
        .build())
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Failed to build email: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("Failed to send email: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentDetails {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    #[serde(default)]
    pub patient_email: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub appointment_details: Option<AppointmentDetails>,
}

fn require<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, EmailError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(EmailError::MissingField(field))
}

fn validate(
    payload: &SendEmailRequest,
) -> Result<(&str, &str, &str, &AppointmentDetails), EmailError> {
    let email = require(&payload.patient_email, "patientEmail")?;
    let name = require(&payload.patient_name, "patientName")?;
    let status = require(&payload.status, "status")?;
    let details = payload
        .appointment_details
        .as_ref()
        .ok_or(EmailError::MissingField("appointmentDetails"))?;
    if details.date.trim().is_empty() {
        return Err(EmailError::MissingField("appointmentDetails.date"));
    }
    if details.time.trim().is_empty() {
        return Err(EmailError::MissingField("appointmentDetails.time"));
    }
    if details.service.trim().is_empty() {
        return Err(EmailError::MissingField("appointmentDetails.service"));
    }
    Ok((email, name, status, details))
}

/// The HTML body sent to the patient. The Reason line only appears for a
/// declined appointment that carries one.
pub fn appointment_email_html(
    patient_name: &str,
    status: &str,
    details: &AppointmentDetails,
    clinic_name: &str,
) -> String {
    let mut body = format!(
        "<p>Dear {},</p>\n\
         <p>Your appointment has been <strong>{}</strong>.</p>\n\
         <p><strong>Details:</strong></p>\n\
         <ul>\n\
             <li><strong>Date:</strong> {}</li>\n\
             <li><strong>Time:</strong> {}</li>\n\
             <li><strong>Service:</strong> {}</li>\n\
         </ul>\n",
        patient_name, status, details.date, details.time, details.service
    );
    if status == STATUS_DECLINED {
        if let Some(reason) = details.reason.as_ref().filter(|r| !r.trim().is_empty()) {
            body.push_str(&format!("<p><strong>Reason:</strong> {}</p>\n", reason));
        }
    }
    body.push_str(&format!("<p>Best regards,</p>\n<p>{}</p>", clinic_name));
    body
}

async fn deliver(
    state: &AppState,
    to: &str,
    patient_name: &str,
    status: &str,
    details: &AppointmentDetails,
) -> Result<(), EmailError> {
    let from: Mailbox = format!(
        "{} <{}>",
        state.config.clinic_name, state.config.smtp_username
    )
    .parse()?;
    let to: Mailbox = to.parse()?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(format!("Appointment {}", status))
        .header(ContentType::TEXT_HTML)
        .body(appointment_email_html(
            patient_name,
            status,
            details,
            &state.config.clinic_name,
        ))?;

    state.mailer.send(message).await?;
    info!("Appointment {} email sent", status);
    Ok(())
}

fn error_response(err: EmailError) -> HttpResponse {
    match err {
        EmailError::MissingField(_) | EmailError::Address(_) => {
            HttpResponse::BadRequest().json(json!({
                "success": false,
                "message": err.to_string(),
            }))
        }
        EmailError::Build(_) | EmailError::Smtp(_) => {
            error!("Email API error: {}", err);
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "message": err.to_string(),
            }))
        }
    }
}

/// POST /appointment/sendEmail
pub async fn send_appointment_email(
    data: web::Data<AppState>,
    payload: web::Json<SendEmailRequest>,
) -> impl Responder {
    let (to, name, status, details) = match validate(&payload) {
        Ok(parts) => parts,
        Err(e) => return error_response(e),
    };
    match deliver(&data, to, name, status, details).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_server::ChatServer;
    use crate::config::Config;
    use crate::db::MongoDB;
    use actix::Actor;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn details() -> AppointmentDetails {
        AppointmentDetails {
            date: "2025-02-14".to_string(),
            time: "10:00".to_string(),
            service: "Cleaning".to_string(),
            reason: None,
        }
    }

    fn request(payload: serde_json::Value) -> SendEmailRequest {
        serde_json::from_value(payload).unwrap()
    }

    #[actix_web::test]
    async fn validation_names_each_missing_field() {
        let missing_email = request(json!({
            "patientName": "Ana Cruz",
            "status": "Confirmed",
            "appointmentDetails": { "date": "2025-02-14", "time": "10:00", "service": "Cleaning" }
        }));
        match validate(&missing_email) {
            Err(EmailError::MissingField(field)) => assert_eq!(field, "patientEmail"),
            other => panic!("expected missing patientEmail, got {:?}", other.is_ok()),
        }

        let blank_name = request(json!({
            "patientEmail": "ana@example.com",
            "patientName": "   ",
            "status": "Confirmed",
            "appointmentDetails": {}
        }));
        match validate(&blank_name) {
            Err(EmailError::MissingField(field)) => assert_eq!(field, "patientName"),
            other => panic!("expected missing patientName, got {:?}", other.is_ok()),
        }

        let missing_details = request(json!({
            "patientEmail": "ana@example.com",
            "patientName": "Ana Cruz",
            "status": "Confirmed"
        }));
        match validate(&missing_details) {
            Err(EmailError::MissingField(field)) => assert_eq!(field, "appointmentDetails"),
            other => panic!("expected missing appointmentDetails, got {:?}", other.is_ok()),
        }

        let missing_service = request(json!({
            "patientEmail": "ana@example.com",
            "patientName": "Ana Cruz",
            "status": "Confirmed",
            "appointmentDetails": { "date": "2025-02-14", "time": "10:00", "service": "" }
        }));
        match validate(&missing_service) {
            Err(EmailError::MissingField(field)) => assert_eq!(field, "appointmentDetails.service"),
            other => panic!("expected missing service, got {:?}", other.is_ok()),
        }
    }

    #[actix_web::test]
    async fn declined_email_includes_reason_line() {
        let mut declined = details();
        declined.reason = Some("Dentist unavailable".to_string());
        let body = appointment_email_html("Ana Cruz", "Declined", &declined, "AFDomingo Dental Clinic");
        assert!(body.contains("<strong>Reason:</strong> Dentist unavailable"));
        assert!(body.contains("Dear Ana Cruz,"));
        assert!(body.contains("<strong>Declined</strong>"));
    }

    #[actix_web::test]
    async fn non_declined_email_omits_reason_line() {
        let mut confirmed = details();
        confirmed.reason = Some("should not appear".to_string());
        let body =
            appointment_email_html("Ana Cruz", "Confirmed", &confirmed, "AFDomingo Dental Clinic");
        assert!(!body.contains("Reason"));
        assert!(body.contains("<li><strong>Date:</strong> 2025-02-14</li>"));
        assert!(body.contains("<li><strong>Time:</strong> 10:00</li>"));
        assert!(body.contains("<li><strong>Service:</strong> Cleaning</li>"));
        assert!(body.ends_with("<p>AFDomingo Dental Clinic</p>"));
    }

    #[actix_web::test]
    async fn error_responses_map_to_http_statuses() {
        assert_eq!(
            error_response(EmailError::MissingField("patientEmail")).status(),
            StatusCode::BAD_REQUEST
        );
        let bad_address = "not-an-email".parse::<Mailbox>().unwrap_err();
        assert_eq!(
            error_response(EmailError::Address(bad_address)).status(),
            StatusCode::BAD_REQUEST
        );
    }

    fn test_config() -> Config {
        Config {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            database_name: "clinic_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            frontend_origin: "http://localhost:5173".to_string(),
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_username: "clinic@example.com".to_string(),
            smtp_password: "password".to_string(),
            clinic_name: "AFDomingo Dental Clinic".to_string(),
        }
    }

    async fn test_state() -> AppState {
        let config = test_config();
        let mongodb = Arc::new(MongoDB::init(&config.mongo_uri, &config.database_name).await);
        let chat_server = ChatServer::new(mongodb.clone()).start();
        let mailer = build_mailer(&config.smtp_host, &config.smtp_username, &config.smtp_password)
            .expect("mailer should build");
        AppState {
            chat_server,
            mongodb,
            mailer,
            config,
        }
    }

    #[actix_web::test]
    async fn send_email_rejects_missing_patient_email() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(web::Data::new(state)).route(
            "/appointment/sendEmail",
            web::post().to(send_appointment_email),
        ))
        .await;

        let req = test::TestRequest::post()
            .uri("/appointment/sendEmail")
            .set_json(json!({
                "patientName": "Ana Cruz",
                "status": "Confirmed",
                "appointmentDetails": { "date": "2025-02-14", "time": "10:00", "service": "Cleaning" }
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["message"], json!("Missing required field: patientEmail"));
    }

    #[actix_web::test]
    async fn send_email_rejects_unparseable_address() {
        let state = test_state().await;
        let app = test::init_service(App::new().app_data(web::Data::new(state)).route(
            "/appointment/sendEmail",
            web::post().to(send_appointment_email),
        ))
        .await;

        // Address parsing fails before any SMTP connection is attempted.
        let req = test::TestRequest::post()
            .uri("/appointment/sendEmail")
            .set_json(json!({
                "patientEmail": "not-an-email",
                "patientName": "Ana Cruz",
                "status": "Confirmed",
                "appointmentDetails": { "date": "2025-02-14", "time": "10:00", "service": "Cleaning" }
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], json!(false));
    }
}
