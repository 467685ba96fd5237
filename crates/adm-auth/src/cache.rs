use adm_error::{AdmError, Result};
use redis::{AsyncCommands, Client as RedisClient};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

const KEY_PREFIX: &str = "data_scope:role_dept:";

/// 角色的自定义数据权限部门缓存
///
/// 配置了 Redis 时写入 Redis 并设置过期时间，否则保存在进程内。
pub struct GrantCache {
    redis_client: Option<RedisClient>,
    ttl_secs: u64,
    local: RwLock<HashMap<i64, BTreeSet<i64>>>,
}

impl GrantCache {
    pub fn new(redis_url: Option<String>, ttl_secs: u64) -> Result<Self> {
        let redis_client = if let Some(url) = redis_url {
            Some(RedisClient::open(url).map_err(|e| AdmError::Configuration {
                key: "redis_url".to_string(),
                reason: format!("Failed to connect to Redis: {}", e),
            })?)
        } else {
            None
        };

        Ok(Self {
            redis_client,
            ttl_secs,
            local: RwLock::new(HashMap::new()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            redis_client: None,
            ttl_secs: 0,
            local: RwLock::new(HashMap::new()),
        }
    }

    fn key(role_id: i64) -> String {
        format!("{}{}", KEY_PREFIX, role_id)
    }

    async fn connection(client: &RedisClient) -> Result<redis::aio::Connection> {
        client
            .get_async_connection()
            .await
            .map_err(|e| AdmError::Network {
                operation: "redis_connection".to_string(),
                message: e.to_string(),
            })
    }

    pub async fn get(&self, role_id: i64) -> Result<Option<BTreeSet<i64>>> {
        let Some(client) = &self.redis_client else {
            return Ok(self.local.read().await.get(&role_id).cloned());
        };

        let mut conn = Self::connection(client).await?;
        let data: Option<String> =
            conn.get(Self::key(role_id))
                .await
                .map_err(|e| AdmError::Network {
                    operation: "redis_get".to_string(),
                    message: e.to_string(),
                })?;

        match data {
            Some(data) => {
                let depts = serde_json::from_str(&data)?;
                Ok(Some(depts))
            }
            None => Ok(None),
        }
    }

    pub async fn put(&self, role_id: i64, dept_ids: &BTreeSet<i64>) -> Result<()> {
        let Some(client) = &self.redis_client else {
            self.local.write().await.insert(role_id, dept_ids.clone());
            return Ok(());
        };

        let mut conn = Self::connection(client).await?;
        let data = serde_json::to_string(dept_ids)?;
        conn.set_ex::<_, _, ()>(Self::key(role_id), data, self.ttl_secs as usize)
            .await
            .map_err(|e| AdmError::Network {
                operation: "redis_setex".to_string(),
                message: e.to_string(),
            })?;

        debug!(role_id, depts = dept_ids.len(), "角色部门授权已缓存");
        Ok(())
    }

    /// 角色授权变更后调用
    pub async fn invalidate(&self, role_id: i64) -> Result<()> {
        let Some(client) = &self.redis_client else {
            self.local.write().await.remove(&role_id);
            return Ok(());
        };

        let mut conn = Self::connection(client).await?;
        conn.del::<_, ()>(Self::key(role_id))
            .await
            .map_err(|e| AdmError::Network {
                operation: "redis_delete".to_string(),
                message: e.to_string(),
            })
    }

    pub async fn clear(&self) -> Result<()> {
        let Some(client) = &self.redis_client else {
            self.local.write().await.clear();
            return Ok(());
        };

        let mut conn = Self::connection(client).await?;
        let keys: Vec<String> = conn
            .keys(format!("{}*", KEY_PREFIX))
            .await
            .map_err(|e| AdmError::Network {
                operation: "redis_keys".to_string(),
                message: e.to_string(),
            })?;
        if keys.is_empty() {
            return Ok(());
        }

        conn.del::<_, ()>(keys)
            .await
            .map_err(|e| AdmError::Network {
                operation: "redis_delete".to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let cache = GrantCache::new(None, 60).unwrap();
        assert_eq!(cache.get(2).await.unwrap(), None);

        cache.put(2, &BTreeSet::from([3, 7])).await.unwrap();
        cache.put(4, &BTreeSet::new()).await.unwrap();
        assert_eq!(cache.get(2).await.unwrap(), Some(BTreeSet::from([3, 7])));
        // 空授权也会被缓存
        assert_eq!(cache.get(4).await.unwrap(), Some(BTreeSet::new()));

        cache.invalidate(2).await.unwrap();
        assert_eq!(cache.get(2).await.unwrap(), None);

        cache.clear().await.unwrap();
        assert_eq!(cache.get(4).await.unwrap(), None);
    }

    #[test]
    fn test_key_format() {
        assert_eq!(GrantCache::key(12), "data_scope:role_dept:12");
    }

    #[test]
    fn test_invalid_redis_url() {
        let err = GrantCache::new(Some("not a url".to_string()), 60).err().unwrap();
        assert!(matches!(err, AdmError::Configuration { .. }));
    }
}
