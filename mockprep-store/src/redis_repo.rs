use async_trait::async_trait;
use chrono::Duration;
use mockprep_booking::{BookingFlow, FlowStore};
use mockprep_core::{CoreError, CoreResult};
use redis::{AsyncCommands, RedisResult};
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// Fixed-window counter. Returns false once `limit` is exceeded within the window.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }

    // Hash operations for flows
    pub async fn hset_with_expiry(&self, key: &str, fields: &[(&str, &str)], ttl_seconds: i64) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::pipe()
            .atomic()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_seconds)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
    }

    pub async fn hget_field(&self, key: &str, field: &str) -> RedisResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.hget(key, field).await
    }
}

fn flow_key(id: Uuid) -> String {
    format!("flow:{}", id)
}

fn redis_error(e: redis::RedisError) -> CoreError {
    tracing::error!("Redis error: {}", e);
    CoreError::Storage(e.to_string())
}

/// Flows as Redis hashes (`flow:{id}`) expiring with the flow's retention window.
pub struct RedisFlowStore {
    redis: RedisClient,
}

impl RedisFlowStore {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl FlowStore for RedisFlowStore {
    async fn save(&self, flow: &BookingFlow, ttl: Duration) -> CoreResult<()> {
        let state = serde_json::to_string(flow).map_err(|e| CoreError::Storage(e.to_string()))?;
        let hold_id = flow.hold.as_ref().map(|h| h.id.to_string()).unwrap_or_default();
        let fields = [
            ("state", state.as_str()),
            ("stage", flow.stage.as_str()),
            ("user_id", flow.user_id.as_str()),
            ("hold_id", hold_id.as_str()),
        ];

        self.redis
            .hset_with_expiry(&flow_key(flow.id), &fields, ttl.num_seconds().max(1))
            .await
            .map_err(redis_error)
    }

    async fn load(&self, id: Uuid) -> CoreResult<Option<BookingFlow>> {
        let Some(state) = self.redis.hget_field(&flow_key(id), "state").await.map_err(redis_error)? else {
            return Ok(None);
        };
        let flow = serde_json::from_str(&state)
            .map_err(|e| CoreError::Storage(format!("flow {} is unreadable: {}", id, e)))?;
        Ok(Some(flow))
    }
}
