use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Responder};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::error;
use mongodb::bson::doc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::USERS_COLLECTION;

pub const ROLE_ADMIN: &str = "userAdmin";
pub const ROLE_SECRETARY: &str = "userSecretary";
pub const ROLE_DENTIST: &str = "userDentist";
pub const ROLE_PATIENT: &str = "userPatient";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// Authenticated identity placed into request extensions by the
/// `Authentication` middleware in `main.rs`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        matches!(
            self.role.as_str(),
            ROLE_ADMIN | ROLE_SECRETARY | ROLE_DENTIST
        )
    }
}

pub fn auth_user(req: &HttpRequest) -> Option<AuthUser> {
    req.extensions().get::<AuthUser>().cloned()
}

/// Account document in `users`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub created_at: chrono::DateTime<Utc>,
}

/// Response shape for account lookups. Never carries the password hash.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        PublicUser {
            user_id: user.user_id,
            name: user.name,
            email: user.email,
            role: user.role,
        }
    }
}

#[derive(Deserialize)]
pub struct SignupInfo {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginInfo {
    pub email: String,
    pub password: String,
}

// JWT Creation
pub fn create_jwt(
    user_id: &str,
    role: &str,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

// JWT Validation
pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

pub fn valid_email(email: &str) -> bool {
    let pattern = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    pattern.is_match(email)
}

fn valid_role(role: &str) -> bool {
    matches!(
        role,
        ROLE_ADMIN | ROLE_SECRETARY | ROLE_DENTIST | ROLE_PATIENT
    )
}

// Signup Endpoint
pub async fn signup(
    data: web::Data<AppState>,
    signup_info: web::Json<SignupInfo>,
) -> impl Responder {
    let email = signup_info.email.trim().to_lowercase();
    if !valid_email(&email) {
        return HttpResponse::BadRequest().body("Invalid email address");
    }
    if signup_info.password.len() < 8 {
        return HttpResponse::BadRequest().body("Password must be at least 8 characters");
    }
    let role = signup_info
        .role
        .clone()
        .unwrap_or_else(|| ROLE_PATIENT.to_string());
    if !valid_role(&role) {
        return HttpResponse::BadRequest().body("Unknown role");
    }

    let users_collection = data.mongodb.db.collection::<User>(USERS_COLLECTION);

    match users_collection.find_one(doc! { "email": &email }).await {
        Ok(Some(_)) => return HttpResponse::BadRequest().body("Email already registered"),
        Ok(None) => {}
        Err(e) => {
            error!("Error checking existing account: {}", e);
            return HttpResponse::InternalServerError().body("Error creating account");
        }
    }

    let hashed_password = match hash(&signup_info.password, DEFAULT_COST) {
        Ok(h) => h,
        Err(_) => return HttpResponse::InternalServerError().body("Error hashing password"),
    };

    let new_user = User {
        user_id: Uuid::new_v4().to_string(),
        name: signup_info.name.trim().to_string(),
        email,
        password: hashed_password,
        role,
        created_at: Utc::now(),
    };

    match users_collection.insert_one(&new_user).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "Account created",
            "userId": new_user.user_id
        })),
        Err(e) => {
            error!("Error creating account: {}", e);
            HttpResponse::InternalServerError().body("Error creating account")
        }
    }
}

// Login Endpoint
pub async fn login(data: web::Data<AppState>, login_info: web::Json<LoginInfo>) -> impl Responder {
    let users_collection = data.mongodb.db.collection::<User>(USERS_COLLECTION);
    let email = login_info.email.trim().to_lowercase();
    let user_doc = users_collection.find_one(doc! { "email": &email }).await;

    match user_doc {
        Ok(Some(user)) => {
            if verify(&login_info.password, &user.password).unwrap_or(false) {
                let token = match create_jwt(&user.user_id, &user.role, &data.config.jwt_secret) {
                    Ok(t) => t,
                    Err(e) => {
                        error!("Error signing token: {}", e);
                        return HttpResponse::InternalServerError().body("Error logging in");
                    }
                };
                HttpResponse::Ok().json(serde_json::json!({
                    "token": token,
                    "userId": user.user_id,
                    "name": user.name,
                    "role": user.role
                }))
            } else {
                HttpResponse::Unauthorized().body("Invalid credentials")
            }
        }
        Ok(None) => HttpResponse::Unauthorized().body("Invalid credentials"),
        Err(e) => {
            error!("Error logging in: {}", e);
            HttpResponse::InternalServerError().body("Error logging in")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip_preserves_claims() {
        let token = create_jwt("user-1", ROLE_SECRETARY, "test-secret").unwrap();
        let claims = validate_jwt(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, ROLE_SECRETARY);
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let token = create_jwt("user-1", ROLE_PATIENT, "test-secret").unwrap();
        assert!(validate_jwt(&token, "other-secret").is_err());
    }

    #[test]
    fn email_validation() {
        assert!(valid_email("patient@example.com"));
        assert!(valid_email("front.desk@clinic.ph"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing@domain"));
        assert!(!valid_email("spaces in@example.com"));
    }

    #[test]
    fn staff_roles() {
        let staff = AuthUser {
            user_id: "u".to_string(),
            role: ROLE_DENTIST.to_string(),
        };
        let patient = AuthUser {
            user_id: "u".to_string(),
            role: ROLE_PATIENT.to_string(),
        };
        assert!(staff.is_staff());
        assert!(!patient.is_staff());
    }
}
