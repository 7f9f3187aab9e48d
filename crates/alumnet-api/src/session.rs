//! Auth provider: accounts, password sign-in and revocable session tokens.

use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use alumnet_db::{NewDocument, SharedStore, blocking, transaction};
use alumnet_types::api::{Claims, RegisterRequest};
use alumnet_types::models::User;

pub const USERS: &str = "users";
pub const CREDENTIALS: &str = "credentials";
pub const REVOKED_SESSIONS: &str = "revokedSessions";

const SESSION_DAYS: i64 = 30;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid or expired session")]
    InvalidToken,

    #[error("email already registered")]
    EmailTaken,

    #[error("{0}")]
    Invalid(String),

    #[error("document store error: {0}")]
    Store(anyhow::Error),

    #[error("password hashing failed")]
    Hash,
}

/// The signed-in user behind a request or gateway connection.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub session_id: String,
    pub expires_at: usize,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn { user_id: String, session_id: String },
    SignedOut { user_id: String, session_id: String },
}

#[derive(Clone)]
pub struct AuthProvider {
    store: SharedStore,
    jwt_secret: Arc<str>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthProvider {
    pub fn new(store: SharedStore, jwt_secret: &str) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            jwt_secret: Arc::from(jwt_secret),
            events,
        }
    }

    /// Notifies on every sign-in and sign-out.
    pub fn on_auth_change(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Creates the account and its profile, then signs in.
    pub async fn register(&self, req: RegisterRequest) -> Result<Session, AuthError> {
        let email = normalize_email(&req.email)?;
        if req.full_name.trim().is_empty() {
            return Err(AuthError::Invalid("full name is required".into()));
        }
        if req.password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::Invalid(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let password = req.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|_| AuthError::Hash)??;

        let user_id = Uuid::new_v4().to_string();
        let user = User {
            id: user_id.clone(),
            full_name: req.full_name.trim().to_string(),
            email: email.clone(),
            college_email: req.college_email,
            profile_photo_url: req.profile_photo_url,
            graduation_year: req.graduation_year,
            degree: req.degree,
            qualification: req.qualification,
            department: req.department,
            job_location: req.job_location,
            permanent_location: req.permanent_location,
            employment: req.employment,
            phone: req.phone,
            linkedin: req.linkedin,
            country: req.country,
        };

        let key = email.clone();
        let uid = user_id.clone();
        let created = blocking(&self.store, move |store| {
            let profile = NewDocument::from_serialize(&user)?;
            transaction(store, |tx| {
                if tx.get(CREDENTIALS, &key)?.is_some() {
                    return Ok(false);
                }
                tx.set(
                    CREDENTIALS,
                    &key,
                    NewDocument::new()
                        .field("user_id", uid.as_str())
                        .field("password", password_hash.as_str())
                        .server_timestamp("created_at"),
                )?;
                tx.set(USERS, &uid, profile.clone())?;
                Ok(true)
            })
        })
        .await
        .map_err(AuthError::Store)?;

        if !created {
            return Err(AuthError::EmailTaken);
        }

        info!("Registered user {} <{}>", user_id, email);
        self.issue_session(user_id, email)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;

        let key = email.clone();
        let credentials = blocking(&self.store, move |store| store.get(CREDENTIALS, &key))
            .await
            .map_err(AuthError::Store)?
            .ok_or(AuthError::InvalidCredentials)?;

        let user_id = credentials
            .get_str("user_id")
            .ok_or(AuthError::InvalidCredentials)?
            .to_string();
        let stored_hash = credentials
            .get_str("password")
            .ok_or(AuthError::InvalidCredentials)?
            .to_string();

        let password = password.to_string();
        tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
            .await
            .map_err(|_| AuthError::Hash)??;

        self.issue_session(user_id, email)
    }

    /// Revokes the session so its token stops authenticating.
    pub async fn sign_out(&self, user: &CurrentUser) -> Result<(), AuthError> {
        let session_id = user.session_id.clone();
        let doc = NewDocument::new()
            .field("user_id", user.id.as_str())
            .field("expires_at", user.expires_at as u64)
            .server_timestamp("revoked_at");

        blocking(&self.store, move |store| store.set(REVOKED_SESSIONS, &session_id, doc))
            .await
            .map_err(AuthError::Store)?;

        info!("User {} signed out (session {})", user.id, user.session_id);
        let _ = self.events.send(AuthEvent::SignedOut {
            user_id: user.id.clone(),
            session_id: user.session_id.clone(),
        });
        Ok(())
    }

    /// Resolves a bearer token. Invalid, expired and revoked tokens are `None`.
    pub async fn current_user(&self, token: &str) -> Result<Option<CurrentUser>, AuthError> {
        let claims = match self.decode_token(token) {
            Ok(claims) => claims,
            Err(_) => return Ok(None),
        };

        let jti = claims.jti.clone();
        let revoked = blocking(&self.store, move |store| store.get(REVOKED_SESSIONS, &jti))
            .await
            .map_err(AuthError::Store)?
            .is_some();
        if revoked {
            warn!("Rejected revoked session {}", claims.jti);
            return Ok(None);
        }

        Ok(Some(CurrentUser {
            id: claims.sub,
            email: claims.email,
            session_id: claims.jti,
            expires_at: claims.exp,
        }))
    }

    fn issue_session(&self, user_id: String, email: String) -> Result<Session, AuthError> {
        let session_id = Uuid::new_v4().to_string();
        let claims = Claims {
            sub: user_id.clone(),
            email: email.clone(),
            jti: session_id.clone(),
            exp: (chrono::Utc::now() + chrono::Duration::days(SESSION_DAYS)).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::Store(e.into()))?;

        let _ = self.events.send(AuthEvent::SignedIn {
            user_id: user_id.clone(),
            session_id,
        });

        Ok(Session { user_id, email, token })
    }

    fn decode_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
    }
}

/// Lower-cases and checks an email address. Emails key the credentials
/// collection, so anything that cannot be a document key is rejected.
fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
        && !email.contains('/')
        && !email.chars().any(char::is_whitespace);

    if valid {
        Ok(email)
    } else {
        Err(AuthError::Invalid("invalid email address".into()))
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::Hash)
}

fn verify_password(password: &str, stored_hash: &str) -> Result<(), AuthError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|_| AuthError::Hash)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alumnet_db::{Database, DocumentStore};

    fn provider() -> (SharedStore, AuthProvider) {
        let store: SharedStore = Arc::new(Database::open_in_memory().unwrap());
        let auth = AuthProvider::new(store.clone(), "test-secret");
        (store, auth)
    }

    fn request(email: &str) -> RegisterRequest {
        RegisterRequest {
            full_name: "Ada Lovelace".into(),
            email: email.into(),
            password: "correct horse".into(),
            department: "Mathematics".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn register_then_sign_in() {
        let (store, auth) = provider();
        let session = auth.register(request("Ada@Example.org")).await.unwrap();
        assert_eq!(session.email, "ada@example.org");

        let profile = store.get(USERS, &session.user_id).unwrap().unwrap();
        assert_eq!(profile.get_str("department"), Some("Mathematics"));
        let credentials = store.get(CREDENTIALS, "ada@example.org").unwrap().unwrap();
        assert!(credentials.get_str("password").unwrap().starts_with("$argon2"));
        assert!(profile.get("password").is_none());

        let again = auth.sign_in("ada@example.org", "correct horse").await.unwrap();
        assert_eq!(again.user_id, session.user_id);

        let user = auth.current_user(&again.token).await.unwrap().unwrap();
        assert_eq!(user.id, session.user_id);
        assert_eq!(user.email, "ada@example.org");
    }

    #[tokio::test]
    async fn rejects_bad_registrations() {
        let (_store, auth) = provider();
        auth.register(request("ada@example.org")).await.unwrap();

        assert!(matches!(
            auth.register(request("ADA@example.org")).await,
            Err(AuthError::EmailTaken)
        ));
        assert!(matches!(
            auth.register(request("not-an-email")).await,
            Err(AuthError::Invalid(_))
        ));

        let mut short = request("bob@example.org");
        short.password = "short".into();
        assert!(matches!(auth.register(short).await, Err(AuthError::Invalid(_))));
    }

    #[tokio::test]
    async fn wrong_password_fails() {
        let (_store, auth) = provider();
        auth.register(request("ada@example.org")).await.unwrap();

        assert!(matches!(
            auth.sign_in("ada@example.org", "wrong password").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.sign_in("nobody@example.org", "correct horse").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn sign_out_revokes_and_notifies() {
        let (_store, auth) = provider();
        let mut events = auth.on_auth_change();

        let session = auth.register(request("ada@example.org")).await.unwrap();
        let user = auth.current_user(&session.token).await.unwrap().unwrap();
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::SignedIn { .. }));

        auth.sign_out(&user).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            AuthEvent::SignedOut {
                user_id: user.id.clone(),
                session_id: user.session_id.clone(),
            }
        );
        assert!(auth.current_user(&session.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_tokens_are_anonymous() {
        let (_store, auth) = provider();
        assert!(auth.current_user("not.a.jwt").await.unwrap().is_none());

        let other = AuthProvider::new(
            Arc::new(Database::open_in_memory().unwrap()),
            "other-secret",
        );
        let foreign = other.register(request("eve@example.org")).await.unwrap();
        assert!(auth.current_user(&foreign.token).await.unwrap().is_none());
    }
}
