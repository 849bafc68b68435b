//! services/api/src/adapters/rate.rs
//!
//! Resolves the effective per-minute billing rate for a host from the charm
//! level tables, falling back to the host's stored static rate when the host
//! has no level progress yet.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use hostline_core::domain::{HostAccount, RateKind, RateQuote};
use hostline_core::ports::{PortError, PortResult, RateSource};

/// A `RateSource` backed by the `level_progress` and `charm_levels` tables.
#[derive(Clone)]
pub struct DbRateSource {
    pool: PgPool,
}

impl DbRateSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct LevelRateRecord {
    level: i32,
    rate_per_minute: i64,
}

#[async_trait]
impl RateSource for DbRateSource {
    async fn resolve_rate(&self, host: &HostAccount) -> PortResult<RateQuote> {
        // Highest charm level whose bean threshold the host has reached.
        let record = sqlx::query_as::<_, LevelRateRecord>(
            "SELECT cl.level, cl.rate_per_minute \
             FROM level_progress lp \
             JOIN charm_levels cl ON cl.min_beans <= lp.lifetime_beans \
             WHERE lp.host_id = $1 \
             ORDER BY cl.min_beans DESC \
             LIMIT 1",
        )
        .bind(host.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(match record {
            Some(r) => RateQuote {
                coins_per_minute: r.rate_per_minute,
                kind: RateKind::Leveled(r.level),
            },
            None => RateQuote {
                coins_per_minute: host.rate_per_minute,
                kind: RateKind::Static,
            },
        })
    }
}
