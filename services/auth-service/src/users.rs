use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_auth::Role;
use rand_core::OsRng;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error("username already taken")]
    UsernameTaken,
    #[error("stored role '{0}' is not recognised")]
    InvalidRole(String),
    #[error("user store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: Option<String>,
    pub username: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: Option<String>,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Read access to user accounts plus the single write needed for registration.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError>;
    async fn insert(&self, user: NewUser) -> Result<User, UserStoreError>;
    async fn list(&self) -> Result<Vec<User>, UserStoreError>;

    /// Looks a user up by email when the identifier contains `@`, by username otherwise.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, UserStoreError> {
        let identifier = identifier.trim();
        if identifier.contains('@') {
            self.find_by_email(identifier).await
        } else {
            self.find_by_username(&identifier.to_lowercase()).await
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Constant outcome for unparseable hashes: they never verify.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Checks a candidate password against a stored PHC string.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, password: &str, password_hash: &str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Verifier;

impl CredentialVerifier for Argon2Verifier {
    fn verify(&self, password: &str, password_hash: &str) -> bool {
        verify_password(password, password_hash)
    }
}

/// Argon2 hash with the same parameters as stored accounts, used when no account matches.
pub fn placeholder_password_hash() -> &'static str {
    static PLACEHOLDER: OnceLock<String> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        let secret = SaltString::generate(&mut OsRng);
        hash_password(secret.as_str()).unwrap_or_default()
    })
}

/// Runs exactly one verification whether or not `user` is present.
pub fn check_credentials(
    verifier: &dyn CredentialVerifier,
    password: &str,
    user: Option<User>,
) -> Option<User> {
    let password_hash = match &user {
        Some(user) => user.password_hash.as_str(),
        None => placeholder_password_hash(),
    };
    let verified = verifier.verify(password, password_hash);
    user.filter(|_| verified)
}

const USER_COLUMNS: &str = "id, name, username, email, password_hash, role, created_at";

fn user_from_row(row: &PgRow) -> Result<User, UserStoreError> {
    let role: String = row.try_get("role")?;
    let role = role
        .parse::<Role>()
        .map_err(|_| UserStoreError::InvalidRole(role.clone()))?;
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_where(&self, column: &str, value: &str) -> Result<Option<User>, UserStoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        self.find_where("email", email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        self.find_where("username", username).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert(&self, user: NewUser) -> Result<User, UserStoreError> {
        let sql = format!(
            "INSERT INTO users (id, name, username, email, password_hash, role) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.name)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                if let sqlx::Error::Database(db_err) = &err {
                    match db_err.constraint() {
                        Some("users_email_key") => return UserStoreError::EmailTaken,
                        Some("users_username_key") => return UserStoreError::UsernameTaken,
                        _ => {}
                    }
                }
                UserStoreError::Database(err)
            })?;
        user_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<User>, UserStoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, username");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<Vec<User>>,
    unavailable: AtomicBool,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every lookup fails with [`UserStoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn with_users<T>(&self, f: impl FnOnce(&mut Vec<User>) -> T) -> Result<T, UserStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(UserStoreError::Unavailable("user directory offline".to_string()));
        }
        let mut users = self
            .users
            .lock()
            .map_err(|_| UserStoreError::Unavailable("user list poisoned".to_string()))?;
        Ok(f(&mut users))
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserStoreError> {
        self.with_users(|users| users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        self.with_users(|users| users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        self.with_users(|users| users.iter().find(|u| u.id == id).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<User, UserStoreError> {
        self.with_users(|users| {
            if users.iter().any(|u| u.email == user.email) {
                return Err(UserStoreError::EmailTaken);
            }
            if users.iter().any(|u| u.username == user.username) {
                return Err(UserStoreError::UsernameTaken);
            }
            let created = User {
                id: Uuid::new_v4(),
                name: user.name,
                username: user.username,
                email: user.email,
                role: user.role,
                password_hash: user.password_hash,
                created_at: Utc::now(),
            };
            users.push(created.clone());
            Ok(created)
        })?
    }

    async fn list(&self) -> Result<Vec<User>, UserStoreError> {
        self.with_users(|users| users.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            name: None,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password("s3cret-pass").unwrap(),
            role: Role::default(),
        }
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret-pass", "plaintext"));
    }

    #[derive(Default)]
    struct CountingVerifier {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl CredentialVerifier for CountingVerifier {
        fn verify(&self, password: &str, password_hash: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            verify_password(password, password_hash)
        }
    }

    #[test]
    fn placeholder_hash_is_a_real_argon2_hash() {
        let placeholder = placeholder_password_hash();
        assert!(placeholder.starts_with("$argon2"));
        assert!(PasswordHash::new(placeholder).is_ok());
        assert_eq!(placeholder, placeholder_password_hash());
        assert!(!verify_password("", placeholder));
    }

    #[test]
    fn missing_user_still_runs_one_verification() {
        let verifier = CountingVerifier::default();
        assert!(check_credentials(&verifier, "s3cret-pass", None).is_none());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);

        let user = User {
            id: Uuid::new_v4(),
            name: None,
            username: "alice".to_string(),
            email: "alice@shop.test".to_string(),
            role: Role::Admin,
            password_hash: hash_password("s3cret-pass").unwrap(),
            created_at: Utc::now(),
        };
        assert!(check_credentials(&verifier, "wrong", Some(user.clone())).is_none());
        assert!(check_credentials(&verifier, "s3cret-pass", Some(user)).is_some());
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unavailable_directory_fails_lookups() {
        let users = InMemoryUserDirectory::new();
        let alice = users.insert(new_user("alice", "alice@shop.test")).await.unwrap();

        users.set_unavailable(true);
        assert!(matches!(
            users.find_by_id(alice.id).await,
            Err(UserStoreError::Unavailable(_))
        ));
        users.set_unavailable(false);
        assert!(users.find_by_id(alice.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn identifier_routes_to_email_or_username() {
        let users = InMemoryUserDirectory::new();
        users.insert(new_user("alice", "alice@shop.test")).await.unwrap();

        let by_email = users.find_by_identifier("alice@shop.test").await.unwrap();
        let by_name = users.find_by_identifier(" Alice ").await.unwrap();
        assert_eq!(by_email.map(|u| u.username), Some("alice".to_string()));
        assert_eq!(by_name.map(|u| u.email), Some("alice@shop.test".to_string()));
        assert!(users.find_by_identifier("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let users = InMemoryUserDirectory::new();
        users.insert(new_user("alice", "alice@shop.test")).await.unwrap();

        assert!(matches!(
            users.insert(new_user("alice2", "alice@shop.test")).await,
            Err(UserStoreError::EmailTaken)
        ));
        assert!(matches!(
            users.insert(new_user("alice", "other@shop.test")).await,
            Err(UserStoreError::UsernameTaken)
        ));
        assert_eq!(users.list().await.unwrap().len(), 1);
    }

    #[test]
    fn password_hash_is_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            name: Some("Alice".to_string()),
            username: "alice".to_string(),
            email: "alice@shop.test".to_string(),
            role: Role::Admin,
            password_hash: "$argon2id$secret".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["role"], "ADMIN");
    }
}
