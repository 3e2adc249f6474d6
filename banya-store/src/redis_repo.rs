use redis::{AsyncCommands, RedisResult};

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: i64,
        window_seconds: i64,
    ) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }

    /// Kiosk heartbeat, so the register can flag a dead kiosk on a lane.
    pub async fn set_kiosk_heartbeat(&self, lane: &str, ttl_seconds: u64) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("kiosk:{}:alive", lane);
        conn.set_ex(key, "1", ttl_seconds).await
    }

    pub async fn kiosk_alive(&self, lane: &str) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("kiosk:{}:alive", lane);
        let val: Option<String> = conn.get(key).await?;
        Ok(val.is_some())
    }
}
