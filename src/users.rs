//! User accounts.
//!
//! Passwords are stored as Argon2id PHC strings; plaintext never touches
//! the database.

use anyhow::{anyhow, bail, Context, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Minimum accepted password length in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// A stored user. The password hash is never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Check a plaintext password against a stored hash. A malformed hash
/// never verifies.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    match PasswordHash::new(hashed) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    let is_active: i64 = row.get("is_active");
    User {
        id: row.get("id"),
        email: row.get("email"),
        hashed_password: row.get("hashed_password"),
        full_name: row.get("full_name"),
        is_active: is_active != 0,
        created_at: row.get("created_at"),
    }
}

pub async fn create_user(
    pool: &SqlitePool,
    email: &str,
    password: &str,
    full_name: Option<&str>,
) -> Result<User> {
    let email = normalize_email(email);
    if email.is_empty() || !email.contains('@') {
        bail!("Invalid email address: '{}'", email);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        bail!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        );
    }
    if find_by_email(pool, &email).await?.is_some() {
        bail!("User already exists: {}", email);
    }

    let id = Uuid::new_v4().to_string();
    let hashed_password = hash_password(password)?;
    let now = Utc::now().timestamp();

    sqlx::query(
        "INSERT INTO users (id, email, hashed_password, full_name, is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&id)
    .bind(&email)
    .bind(&hashed_password)
    .bind(full_name)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to insert user {}", email))?;

    Ok(User {
        id,
        email,
        hashed_password,
        full_name: full_name.map(str::to_string),
        is_active: true,
        created_at: now,
    })
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, email, hashed_password, full_name, is_active, created_at
         FROM users WHERE email = ?",
    )
    .bind(normalize_email(email))
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(user_from_row))
}

/// Look up a user and check the password. `None` for an unknown email or
/// a wrong password; the caller cannot tell which.
pub async fn authenticate(pool: &SqlitePool, email: &str, password: &str) -> Result<Option<User>> {
    let Some(user) = find_by_email(pool, email).await? else {
        return Ok(None);
    };
    if !verify_password(password, &user.hashed_password) {
        return Ok(None);
    }
    Ok(Some(user))
}

pub async fn set_active(pool: &SqlitePool, email: &str, active: bool) -> Result<()> {
    let result = sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE email = ?")
        .bind(active as i64)
        .bind(Utc::now().timestamp())
        .bind(normalize_email(email))
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        bail!("User not found: {}", email);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Tech@Example.COM "), "tech@example.com");
    }
}
