use std::sync::Arc;

use async_trait::async_trait;
use sqlx::any::AnyPool;
use sqlx::Row;
use stan_gax::{SharedClock, StanError};
use stan_types::limits::ResolvedLimits;
use stan_types::{ChannelId, Message};

use crate::queries::Queries;

/// One channel's view over the shared `messages` table, scoped by
/// `channel_id`. Every back-end connection in the pool serves every
/// channel; there is no per-channel file handle the way the file
/// back-end has one.
pub struct SqlMessageStore {
    pool: AnyPool,
    queries: Arc<Queries>,
    channel_id: ChannelId,
    clock: SharedClock,
    limits: parking_lot::RwLock<ResolvedLimits>,
}

impl SqlMessageStore {
    pub fn new(pool: AnyPool, queries: Arc<Queries>, channel_id: ChannelId, clock: SharedClock, limits: ResolvedLimits) -> Self {
        Self {
            pool,
            queries,
            channel_id,
            clock,
            limits: parking_lot::RwLock::new(limits),
        }
    }

    pub fn set_limits(&self, limits: ResolvedLimits) {
        *self.limits.write() = limits;
    }

    fn row_to_message(&self, row: sqlx::any::AnyRow) -> Result<Message, StanError> {
        let seq: i64 = row.try_get(0).map_err(sql_err)?;
        let timestamp_ns: i64 = row.try_get(1).map_err(sql_err)?;
        let expiration_ns: i64 = row.try_get(2).map_err(sql_err)?;
        let data: Vec<u8> = row.try_get(3).map_err(sql_err)?;
        Ok(Message {
            channel_id: self.channel_id,
            seq: seq as u64,
            timestamp_ns,
            expiration_ns,
            data: data.into(),
        })
    }
}

fn sql_err(e: sqlx::Error) -> StanError {
    StanError::store_unavailable(format!("sql error: {e}"))
}

#[async_trait]
impl stan_store::MessageStore for SqlMessageStore {
    async fn store(&self, data: bytes::Bytes) -> Result<u64, StanError> {
        let now_ns = self.clock.now_ns();
        let max_age_ns = self.limits.read().max_age.as_nanos() as i64;
        let expiration_ns = if max_age_ns > 0 { now_ns + max_age_ns } else { 0 };

        // `seq` is derived from `channels.maxseq`, not `MAX(seq)` over the
        // `messages` table: that table's rows are deleted by `expire`/the
        // MaxMsgs-MaxBytes eviction loop, so `MAX(seq)` would fall back to 0
        // once a channel's messages are all gone, reusing sequence numbers.
        // `maxseq` only ever increases, persisted in the same transaction
        // that inserts the message.
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let maxseq: i64 = sqlx::query(&self.queries.select_channel_maxseq)
            .bind(self.channel_id.0 as i64)
            .fetch_one(&mut *tx)
            .await
            .map_err(sql_err)?
            .try_get(0)
            .map_err(sql_err)?;
        let seq = maxseq + 1;

        sqlx::query(&self.queries.update_channel_maxseq)
            .bind(seq)
            .bind(self.channel_id.0 as i64)
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        sqlx::query(&self.queries.insert_message)
            .bind(self.channel_id.0 as i64)
            .bind(seq)
            .bind(now_ns)
            .bind(expiration_ns)
            .bind(data.to_vec())
            .execute(&mut *tx)
            .await
            .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)?;
        Ok(seq as u64)
    }

    async fn lookup(&self, seq: u64) -> Result<Option<Message>, StanError> {
        let now_ns = self.clock.now_ns();
        let row = sqlx::query(&self.queries.select_message)
            .bind(self.channel_id.0 as i64)
            .bind(seq as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let msg = self.row_to_message(row)?;
                Ok((!msg.is_expired(now_ns)).then_some(msg))
            }
        }
    }

    async fn first_msg(&self) -> Result<Option<Message>, StanError> {
        let row = sqlx::query(&self.queries.select_first_message)
            .bind(self.channel_id.0 as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(|r| self.row_to_message(r)).transpose()
    }

    async fn last_msg(&self) -> Result<Option<Message>, StanError> {
        let row = sqlx::query(&self.queries.select_last_message)
            .bind(self.channel_id.0 as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        row.map(|r| self.row_to_message(r)).transpose()
    }

    async fn first_sequence(&self) -> Result<u64, StanError> {
        let seq: i64 = sqlx::query(&self.queries.select_min_seq)
            .bind(self.channel_id.0 as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(sql_err)?
            .try_get(0)
            .map_err(sql_err)?;
        Ok(seq as u64)
    }

    /// The highest sequence ever assigned, from `channels.maxseq` — never
    /// decremented by expiration or eviction (§3 Channel invariant), unlike
    /// `MAX(seq)` over the live `messages` rows.
    async fn last_sequence(&self) -> Result<u64, StanError> {
        let seq: i64 = sqlx::query(&self.queries.select_channel_maxseq)
            .bind(self.channel_id.0 as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(sql_err)?
            .try_get(0)
            .map_err(sql_err)?;
        Ok(seq as u64)
    }

    async fn get_sequence_from_timestamp(&self, ts_ns: i64) -> Result<u64, StanError> {
        let row = sqlx::query(&self.queries.select_seq_from_timestamp)
            .bind(self.channel_id.0 as i64)
            .bind(ts_ns)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        match row {
            Some(row) => {
                let seq: i64 = row.try_get(0).map_err(sql_err)?;
                Ok(seq as u64)
            }
            None => self.last_sequence().await.map(|s| s + 1),
        }
    }

    async fn expire(&self, now_ns: i64) -> Result<u64, StanError> {
        sqlx::query(&self.queries.delete_expired_messages)
            .bind(self.channel_id.0 as i64)
            .bind(now_ns)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;

        let limits = *self.limits.read();
        loop {
            let row = sqlx::query(&self.queries.select_message_count_and_bytes)
                .bind(self.channel_id.0 as i64)
                .fetch_one(&self.pool)
                .await
                .map_err(sql_err)?;
            let count: i64 = row.try_get(0).map_err(sql_err)?;
            let bytes: i64 = row.try_get(1).map_err(sql_err)?;
            let over_count = limits.max_msgs > 0 && count as u64 > limits.max_msgs;
            let over_bytes = limits.max_bytes > 0 && bytes as u64 > limits.max_bytes;
            if !over_count && !over_bytes {
                break;
            }
            sqlx::query(&self.queries.delete_oldest_message)
                .bind(self.channel_id.0 as i64)
                .bind(self.channel_id.0 as i64)
                .execute(&self.pool)
                .await
                .map_err(sql_err)?;
        }

        let first_seq: i64 = sqlx::query(&self.queries.select_min_seq)
            .bind(self.channel_id.0 as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(sql_err)?
            .try_get(0)
            .map_err(sql_err)?;
        if first_seq == 0 {
            self.last_sequence().await.map(|s| s + 1)
        } else {
            Ok(first_seq as u64)
        }
    }

    fn has_retention_caps(&self) -> bool {
        let limits = *self.limits.read();
        limits.max_msgs > 0 || limits.max_bytes > 0
    }

    async fn flush(&self) -> Result<(), StanError> {
        Ok(())
    }
}
