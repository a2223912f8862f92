use std::sync::Arc;

use async_trait::async_trait;
use sqlx::any::AnyPool;
use sqlx::Row;
use stan_gax::StanError;
use stan_types::limits::ResolvedLimits;
use stan_types::{ChannelId, Subscription, SubscriptionId};

use crate::queries::Queries;

/// One channel's view over the shared `subscriptions`/`subs_pending`
/// tables, scoped by `channel_id`. Subscription ids are allocated from
/// `MAX(subid)` across the whole table (not just this channel), matching
/// the soft-delete id-reservation invariant.
pub struct SqlSubStore {
    pool: AnyPool,
    queries: Arc<Queries>,
    channel_id: ChannelId,
    limits: parking_lot::RwLock<ResolvedLimits>,
}

fn sql_err(e: sqlx::Error) -> StanError {
    StanError::store_unavailable(format!("sql error: {e}"))
}

impl SqlSubStore {
    pub fn new(pool: AnyPool, queries: Arc<Queries>, channel_id: ChannelId, limits: ResolvedLimits) -> Self {
        Self {
            pool,
            queries,
            channel_id,
            limits: parking_lot::RwLock::new(limits),
        }
    }

    pub fn set_limits(&self, limits: ResolvedLimits) {
        *self.limits.write() = limits;
    }

    /// Every non-deleted subscription on this channel, with `acks_pending`
    /// overridden from the `subs_pending` table (the embedded proto copy
    /// may be stale since acks are persisted without rewriting the proto).
    pub async fn recovered_subscriptions(&self) -> Result<Vec<Subscription>, StanError> {
        let rows = sqlx::query(&self.queries.select_subscriptions_by_channel)
            .bind(self.channel_id.0 as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;

        let mut subs = Vec::with_capacity(rows.len());
        for row in rows {
            let proto: Vec<u8> = row.try_get(0).map_err(sql_err)?;
            let mut sub: Subscription = bincode::deserialize(&proto)
                .map_err(|e| StanError::store_corrupt(format!("bad subscription proto: {e}")))?;
            let pending_rows = sqlx::query(&self.queries.select_pending_for_sub)
                .bind(sub.id.0 as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(sql_err)?;
            sub.acks_pending.clear();
            for pr in pending_rows {
                let seq: i64 = pr.try_get(0).map_err(sql_err)?;
                sub.acks_pending.insert(seq as u64, 0);
            }
            subs.push(sub);
        }
        Ok(subs)
    }
}

#[async_trait]
impl stan_store::SubStore for SqlSubStore {
    async fn create_sub(&self, sub: &mut Subscription) -> Result<(), StanError> {
        let active: i64 = sqlx::query(&self.queries.select_active_sub_count)
            .bind(self.channel_id.0 as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(sql_err)?
            .try_get(0)
            .map_err(sql_err)?;
        if active as u64 >= self.limits.read().max_subscriptions {
            return Err(StanError::subscription_limit_reached(format!(
                "channel already has {active} active subscriptions"
            )));
        }

        if sub.id.0 == 0 {
            let max_id: i64 = sqlx::query(&self.queries.select_max_subid)
                .fetch_one(&self.pool)
                .await
                .map_err(sql_err)?
                .try_get(0)
                .map_err(sql_err)?;
            sub.id = SubscriptionId(max_id as u64 + 1);
        }

        let proto = bincode::serialize(sub).map_err(|e| StanError::store_corrupt(format!("encode subscription: {e}")))?;
        sqlx::query(&self.queries.insert_subscription)
            .bind(sub.id.0 as i64)
            .bind(self.channel_id.0 as i64)
            .bind(proto)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn update_sub(&self, sub: &Subscription) -> Result<(), StanError> {
        let proto = bincode::serialize(sub).map_err(|e| StanError::store_corrupt(format!("encode subscription: {e}")))?;
        sqlx::query(&self.queries.update_subscription)
            .bind(proto)
            .bind(sub.id.0 as i64)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn delete_sub(&self, sub_id: SubscriptionId) -> Result<(), StanError> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        sqlx::query(&self.queries.soft_delete_subscription)
            .bind(sub_id.0 as i64)
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        sqlx::query(&self.queries.delete_pending_for_sub)
            .bind(sub_id.0 as i64)
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)
    }

    async fn add_seq_pending(&self, sub_id: SubscriptionId, seq: u64) -> Result<(), StanError> {
        sqlx::query(&self.queries.insert_pending)
            .bind(sub_id.0 as i64)
            .bind(seq as i64)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn ack_seq_pending(&self, sub_id: SubscriptionId, seq: u64) -> Result<(), StanError> {
        sqlx::query(&self.queries.delete_pending)
            .bind(sub_id.0 as i64)
            .bind(seq as i64)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), StanError> {
        Ok(())
    }
}
