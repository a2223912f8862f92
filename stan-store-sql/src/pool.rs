use sqlx::any::{AnyPool, AnyPoolOptions};
use stan_gax::{RetrySetting, StanError};

use crate::dialect::Dialect;

/// Picks the placeholder/DDL dialect from the connection URL scheme, the
/// way a driver handshake would. `sqlx::Any` accepts connections from
/// either engine through one pool type; only the SQL text we hand it
/// needs to vary.
pub fn dialect_from_url(url: &str) -> Dialect {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Dialect::Postgres
    } else {
        Dialect::Sqlite
    }
}

/// Connects with `stan-gax`'s shared retry combinator rather than a
/// hand-rolled sleep loop: a transient connect failure (the relational
/// peer not accepting connections yet) is reported as `StoreUnavailable`,
/// which is exactly the code `RetrySetting::default` retries.
pub async fn connect(url: &str, max_connections: u32) -> Result<AnyPool, StanError> {
    sqlx::any::install_default_drivers();
    stan_gax::invoke(None, Some(RetrySetting::default()), || async {
        AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| StanError::store_unavailable(format!("connect {url}: {e}")))
    })
    .await
}
