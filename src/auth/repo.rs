use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::error::ApiError;

impl User {
    /// Find a user by email. The column is unique, so at most one row matches.
    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, first_name, last_name, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, first_name, last_name, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Insert a new user with a hashed password.
    ///
    /// Two concurrent registrations for the same email can both pass the
    /// handler's pre-check; the UNIQUE constraint on email is the final
    /// authority, and its violation surfaces as DuplicateEmail rather than a
    /// generic server error.
    pub async fn create(
        db: &PgPool,
        email: &str,
        password_hash: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, ApiError> {
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, first_name, last_name, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(first_name)
        .bind(last_name)
        .fetch_one(db)
        .await;

        result.map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ApiError::DuplicateEmail
            }
            _ => ApiError::Store(e),
        })
    }

    /// Update the display names of an existing user. Only first/last name are
    /// reachable through this statement; email and password_hash cannot change
    /// here.
    pub async fn update_names(
        db: &PgPool,
        id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET first_name = $2, last_name = $3
            WHERE id = $1
            RETURNING id, email, password_hash, first_name, last_name, created_at
            "#,
        )
        .bind(id)
        .bind(first_name)
        .bind(last_name)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }
}
