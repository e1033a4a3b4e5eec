use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{NewUser, UserUpdate},
    password,
    repo::UserStore,
    repo_types::User,
};
use crate::error::{AppError, FieldError};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Loose shape check: non-space text, `@`, then a dotted non-space tail.
/// Extra `@` signs are accepted.
pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^\S+@\S+\.\S+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    if email.is_empty() {
        errors.push(FieldError::new("email", "Email is required"));
    } else if !is_valid_email(email) {
        errors.push(FieldError::new("email", "Please enter a valid email address"));
    }
}

fn check_password(plain: &str, errors: &mut Vec<FieldError>) {
    if plain.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    } else if plain.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password",
            "Password must be at least 8 characters long",
        ));
    }
}

fn check_name(field: &'static str, label: &str, value: &str, errors: &mut Vec<FieldError>) {
    if value.is_empty() {
        errors.push(FieldError::new(field, format!("{label} is required")));
    }
}

async fn hash_off_thread(plain: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| AppError::Unknown(format!("hashing task failed: {e}")))?
        .map_err(AppError::from)
}

/// Create/read/update access to user records. Every write that carries a
/// password hashes it before the store sees it.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, new), fields(email = %new.email))]
    pub async fn insert(&self, new: NewUser) -> Result<User, AppError> {
        let email = normalize_email(&new.email);
        let first_name = new.first_name.trim().to_string();
        let last_name = new.last_name.trim().to_string();

        let mut errors = Vec::new();
        check_email(&email, &mut errors);
        check_password(&new.password, &mut errors);
        check_name("firstName", "First name", &first_name, &mut errors);
        check_name("lastName", "Last name", &last_name, &mut errors);
        if !errors.is_empty() {
            warn!(invalid = ?errors.iter().map(|e| e.field).collect::<Vec<_>>(), "user rejected");
            return Err(AppError::Validation(errors));
        }

        let password_hash = hash_off_thread(new.password).await?;
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email,
            password_hash,
            first_name,
            last_name,
            role: new.role.unwrap_or_default(),
            is_active: new.is_active.unwrap_or(true),
            last_login: None,
            created_at: now,
            updated_at: now,
        };

        let saved = self.store.insert(&user).await?;
        info!(user_id = %saved.id, role = %saved.role, "user created");
        Ok(saved)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.store.find_by_email(&normalize_email(email)).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.store.find_by_id(id).await
    }

    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: Uuid, changes: UserUpdate) -> Result<User, AppError> {
        let mut user = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {id}")))?;

        let mut errors = Vec::new();
        if let Some(email) = &changes.email {
            let email = normalize_email(email);
            check_email(&email, &mut errors);
            user.email = email;
        }
        if let Some(plain) = &changes.password {
            check_password(plain, &mut errors);
        }
        if let Some(first) = &changes.first_name {
            user.first_name = first.trim().to_string();
            check_name("firstName", "First name", &user.first_name, &mut errors);
        }
        if let Some(last) = &changes.last_name {
            user.last_name = last.trim().to_string();
            check_name("lastName", "Last name", &user.last_name, &mut errors);
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        if let Some(role) = changes.role {
            user.role = role;
        }
        if let Some(active) = changes.is_active {
            user.is_active = active;
        }
        if changes.last_login.is_some() {
            user.last_login = changes.last_login;
        }
        if let Some(plain) = changes.password {
            user.password_hash = hash_off_thread(plain).await?;
            debug!(user_id = %id, "password rehashed");
        }
        user.updated_at = OffsetDateTime::now_utc();

        self.store.update(&user).await
    }

    /// Returns the user when `plain` matches and the account is active,
    /// stamping `last_login`.
    #[instrument(skip(self, plain))]
    pub async fn authenticate(&self, email: &str, plain: &str) -> Result<Option<User>, AppError> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(None);
        };
        if !user.is_active {
            warn!(user_id = %user.id, "login attempt on inactive account");
            return Ok(None);
        }

        let hash = user.password_hash.clone();
        let candidate = plain.to_string();
        let matches = tokio::task::spawn_blocking(move || password::verify_password(&candidate, &hash))
            .await
            .map_err(|e| AppError::Unknown(format!("verify task failed: {e}")))??;
        if !matches {
            warn!(user_id = %user.id, "invalid password");
            return Ok(None);
        }

        let updated = self
            .update(
                user.id,
                UserUpdate {
                    last_login: Some(OffsetDateTime::now_utc()),
                    ..UserUpdate::default()
                },
            )
            .await?;
        Ok(Some(updated))
    }
}
