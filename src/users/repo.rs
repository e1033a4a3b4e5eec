use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{User, UserRow};
use crate::error::AppError;

/// Persistence seam for user records. Stores receive already-hashed
/// passwords and enforce email uniqueness.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: &User) -> Result<User, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn update(&self, user: &User) -> Result<User, AppError>;
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, role, \
                            is_active, last_login, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &User) -> Result<User, AppError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, role,
                               is_active, last_login, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.role.as_str())
            .bind(user.is_active)
            .bind(user.last_login)
            .bind(user.created_at)
            .bind(user.updated_at)
            .fetch_one(&self.db)
            .await
            .map_err(|e| duplicate_email(e, &user.email))?;
        row.try_into()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn update(&self, user: &User) -> Result<User, AppError> {
        let sql = format!(
            r#"
            UPDATE users
               SET email = $2, password_hash = $3, first_name = $4, last_name = $5,
                   role = $6, is_active = $7, last_login = $8, updated_at = $9
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.role.as_str())
            .bind(user.is_active)
            .bind(user.last_login)
            .bind(user.updated_at)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| duplicate_email(e, &user.email))?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user.id)))?;
        row.try_into()
    }
}

fn duplicate_email(e: sqlx::Error, email: &str) -> AppError {
    match AppError::from(e) {
        AppError::DuplicateKey(_) => AppError::DuplicateKey(format!("email {email} already exists")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::{borrow::Cow, error::Error as StdError};

    use sqlx::error::{DatabaseError, ErrorKind};
    use time::OffsetDateTime;

    use super::*;
    use crate::users::UserRole;

    /// What Postgres reports when `users_email_key` rejects an insert.
    #[derive(Debug, thiserror::Error)]
    #[error("duplicate key value violates unique constraint \"users_email_key\"")]
    struct UniqueViolation;

    impl DatabaseError for UniqueViolation {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint \"users_email_key\""
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("23505"))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_names_the_email() {
        let err = duplicate_email(
            sqlx::Error::Database(Box::new(UniqueViolation)),
            "ada@oalearn.com",
        );
        match err {
            AppError::DuplicateKey(msg) => assert_eq!(msg, "email ada@oalearn.com already exists"),
            other => panic!("expected DuplicateKey, got {other:?}"),
        }
    }

    #[test]
    fn other_errors_pass_through_unchanged() {
        assert!(matches!(
            duplicate_email(sqlx::Error::PoolTimedOut, "ada@oalearn.com"),
            AppError::Transport(_)
        ));
        assert!(matches!(
            duplicate_email(sqlx::Error::RowNotFound, "ada@oalearn.com"),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            duplicate_email(sqlx::Error::ColumnNotFound("email".into()), "ada@oalearn.com"),
            AppError::Unknown(_)
        ));
    }

    // Integration tests require a real database
    // Run with: DATABASE_URL=postgres://... cargo test -- --ignored

    async fn store() -> PgUserStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = PgPool::connect(&url).await.expect("pool creation failed");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations failed");
        PgUserStore::new(pool)
    }

    fn user(email: &str) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            email: email.into(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            role: UserRole::Student,
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn insert_find_and_update_round_trip() {
        let store = store().await;
        let email = format!("{}@oalearn.test", Uuid::new_v4().simple());

        let created = store.insert(&user(&email)).await.expect("insert failed");
        assert_eq!(created.email, email);
        assert_eq!(created.role, UserRole::Student);

        let by_email = store.find_by_email(&email).await.unwrap().expect("by email");
        assert_eq!(by_email.id, created.id);
        let by_id = store.find_by_id(created.id).await.unwrap().expect("by id");
        assert_eq!(by_id.email, email);

        let mut changed = by_id.clone();
        changed.role = UserRole::Admin;
        changed.first_name = "Augusta".into();
        let updated = store.update(&changed).await.expect("update failed");
        assert_eq!(updated.role, UserRole::Admin);
        assert_eq!(updated.full_name(), "Augusta Lovelace");

        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn duplicate_insert_is_a_duplicate_key_error() {
        let store = store().await;
        let email = format!("{}@oalearn.test", Uuid::new_v4().simple());

        store.insert(&user(&email)).await.expect("first insert");
        let err = store.insert(&user(&email)).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateKey(ref m) if m.contains(&email)));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn updating_a_missing_user_is_not_found() {
        let store = store().await;
        let err = store.update(&user("ghost@oalearn.test")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
