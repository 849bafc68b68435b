//! services/api/src/adapters/auth.rs
//!
//! Verifies opaque bearer tokens against the `auth_sessions` table and
//! resolves them into an authenticated identity.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use hostline_core::domain::{AuthContext, UserRole};
use hostline_core::ports::{PortError, PortResult, TokenVerifier};

/// A `TokenVerifier` backed by database-stored sessions.
#[derive(Clone)]
pub struct DbTokenVerifier {
    pool: PgPool,
}

impl DbTokenVerifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct SessionRecord {
    user_id: Uuid,
    role: String,
}

#[async_trait]
impl TokenVerifier for DbTokenVerifier {
    async fn verify(&self, token: &str) -> PortResult<AuthContext> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT s.user_id, u.role \
             FROM auth_sessions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.token = $1 AND s.expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let record = record
            .ok_or_else(|| PortError::Forbidden("invalid or expired access token".to_string()))?;

        let role = match record.role.as_str() {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        };

        Ok(AuthContext {
            user_id: record.user_id,
            role,
        })
    }
}
