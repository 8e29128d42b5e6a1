use std::time::Duration;

use cornerstone_domain::DomainResult;
use cornerstone_domain::error::DomainError;
use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::kv::{
    CacheStore, CounterStore, DirtySetStore, DistributedLock, KvOp, KvPipeline, LockLease,
    Publisher, SortedSetStore,
};
use redis::Value;
use redis::aio::ConnectionManager;

/// Folds the live dirty set into its processing twin and returns the union.
/// A processing set left by a failed run survives and is merged.
const DRAIN_SCRIPT: &str = r#"
    local live_key = KEYS[1]
    local processing_key = KEYS[2]
    if redis.call('EXISTS', live_key) == 1 then
        if redis.call('EXISTS', processing_key) == 1 then
            redis.call('SUNIONSTORE', processing_key, processing_key, live_key)
            redis.call('DEL', live_key)
        else
            redis.call('RENAME', live_key, processing_key)
        end
    end
    return redis.call('SMEMBERS', processing_key)
"#;

const RELEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

fn processing_key(key: &str) -> String {
    format!("{key}:processing")
}

fn ttl_ms(ttl: Duration) -> u64 {
    let ms = ttl.as_millis() as u64;
    if ms == 0 { 1 } else { ms }
}

fn store_error(err: redis::RedisError) -> DomainError {
    DomainError::Unavailable(format!("redis: {err}"))
}

/// Single command for one pipelined op.
fn op_command(op: &KvOp) -> redis::Cmd {
    match op {
        KvOp::SortedAdd { key, member, score } => {
            let mut cmd = redis::cmd("ZADD");
            cmd.arg(key).arg(*score).arg(member);
            cmd
        }
        KvOp::SortedRemove { key, member } => {
            let mut cmd = redis::cmd("ZREM");
            cmd.arg(key).arg(member);
            cmd
        }
        KvOp::SortedTrim { key, keep } => {
            // ranks ascend by score, so the lowest scores sit at the front
            let mut cmd = redis::cmd("ZREMRANGEBYRANK");
            cmd.arg(key).arg(0).arg(-(*keep as i64) - 1);
            cmd
        }
        KvOp::Incr { key } => {
            let mut cmd = redis::cmd("INCR");
            cmd.arg(key);
            cmd
        }
        KvOp::Decr { key } => {
            let mut cmd = redis::cmd("DECR");
            cmd.arg(key);
            cmd
        }
        KvOp::Expire { key, ttl } => {
            let mut cmd = redis::cmd("PEXPIRE");
            cmd.arg(key).arg(ttl_ms(*ttl));
            cmd
        }
        KvOp::SetAdd { key, members } => {
            let mut cmd = redis::cmd("SADD");
            cmd.arg(key).arg(members);
            cmd
        }
    }
}

/// Every KV port over one multiplexed connection.
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> Result<Self, DomainError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| DomainError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| DomainError::Unavailable(err.to_string()))?;
        Ok(Self { manager })
    }
}

impl KvPipeline for RedisKv {
    fn execute(&self, ops: Vec<KvOp>) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async move {
            let ops: Vec<KvOp> = ops
                .into_iter()
                .filter(|op| !matches!(op, KvOp::SetAdd { members, .. } if members.is_empty()))
                .collect();
            if ops.is_empty() {
                return Ok(());
            }
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            for op in &ops {
                pipeline.add_command(op_command(op)).ignore();
            }
            let mut conn = self.manager.clone();
            let _: Vec<Value> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(())
        })
    }
}

impl CounterStore for RedisKv {
    fn incr(&self, key: &str) -> BoxFuture<'_, DomainResult<i64>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let value: i64 = redis::cmd("INCR")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(value)
        })
    }

    fn decr(&self, key: &str) -> BoxFuture<'_, DomainResult<i64>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let value: i64 = redis::cmd("DECR")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(value)
        })
    }

    fn get(&self, key: &str) -> BoxFuture<'_, DomainResult<Option<i64>>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let value: Option<i64> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(value)
        })
    }

    fn set(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_ms(ttl));
            }
            let _: String = cmd.query_async(&mut conn).await.map_err(store_error)?;
            Ok(())
        })
    }

    fn add_member(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let ops = vec![
            KvOp::SetAdd {
                key: key.to_string(),
                members: vec![member.to_string()],
            },
            KvOp::Expire {
                key: key.to_string(),
                ttl,
            },
        ];
        self.execute(ops)
    }

    fn remove_member(&self, key: &str, member: &str) -> BoxFuture<'_, DomainResult<()>> {
        let key = key.to_string();
        let member = member.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: i64 = redis::cmd("SREM")
                .arg(&key)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(())
        })
    }
}

impl DirtySetStore for RedisKv {
    fn mark(&self, key: &str, members: &[String]) -> BoxFuture<'_, DomainResult<()>> {
        self.execute(vec![KvOp::SetAdd {
            key: key.to_string(),
            members: members.to_vec(),
        }])
    }

    fn drain(&self, key: &str) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut members: Vec<String> = redis::Script::new(DRAIN_SCRIPT)
                .key(&key)
                .key(processing_key(&key))
                .invoke_async(&mut conn)
                .await
                .map_err(store_error)?;
            members.sort();
            Ok(members)
        })
    }

    fn complete_drain(&self, key: &str) -> BoxFuture<'_, DomainResult<()>> {
        let processing = processing_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: i64 = redis::cmd("DEL")
                .arg(&processing)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(())
        })
    }
}

impl SortedSetStore for RedisKv {
    fn range_desc(
        &self,
        key: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<(String, i64)>>> {
        let key = key.to_string();
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let mut conn = self.manager.clone();
            let members: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
                .arg(&key)
                .arg(0)
                .arg(limit as i64 - 1)
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(members
                .into_iter()
                .map(|(member, score)| (member, score as i64))
                .collect())
        })
    }

    fn exists(&self, key: &str) -> BoxFuture<'_, DomainResult<bool>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let found: i64 = redis::cmd("EXISTS")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(found > 0)
        })
    }
}

impl CacheStore for RedisKv {
    fn get(&self, key: &str) -> BoxFuture<'_, DomainResult<Option<String>>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let value: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(value)
        })
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, DomainResult<()>> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: String = redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(())
        })
    }

    fn delete(&self, keys: &[String]) -> BoxFuture<'_, DomainResult<()>> {
        let keys = keys.to_vec();
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(());
            }
            let mut conn = self.manager.clone();
            let _: i64 = redis::cmd("DEL")
                .arg(&keys)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(())
        })
    }
}

impl DistributedLock for RedisKv {
    fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, DomainResult<Option<LockLease>>> {
        let key = key.to_string();
        Box::pin(async move {
            let token = uuid::Uuid::new_v4().simple().to_string();
            let mut conn = self.manager.clone();
            let result: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(result.map(|_| LockLease { key, token }))
        })
    }

    fn release(&self, lease: &LockLease) -> BoxFuture<'_, DomainResult<bool>> {
        let lease = lease.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
                .key(&lease.key)
                .arg(&lease.token)
                .invoke_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(removed == 1)
        })
    }
}

impl Publisher for RedisKv {
    fn publish(&self, channel: &str, payload: &str) -> BoxFuture<'_, DomainResult<()>> {
        let channel = channel.to_string();
        let payload = payload.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: i64 = redis::cmd("PUBLISH")
                .arg(&channel)
                .arg(&payload)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(op: KvOp) -> String {
        String::from_utf8_lossy(&op_command(&op).get_packed_command()).into_owned()
    }

    #[test]
    fn trim_keeps_the_highest_scores() {
        let command = packed(KvOp::SortedTrim {
            key: "user:follower:5".into(),
            keep: 1000,
        });
        assert!(command.contains("ZREMRANGEBYRANK"));
        assert!(command.contains("\r\n0\r\n"));
        assert!(command.contains("-1001"));
    }

    #[test]
    fn expiry_is_sent_in_milliseconds() {
        let command = packed(KvOp::Expire {
            key: "user:interest:7".into(),
            ttl: Duration::from_secs(3600),
        });
        assert!(command.contains("PEXPIRE"));
        assert!(command.contains("3600000"));
        assert_eq!(ttl_ms(Duration::ZERO), 1);
    }

    #[test]
    fn sorted_add_puts_the_score_before_the_member() {
        let command = packed(KvOp::SortedAdd {
            key: "user:following:3".into(),
            member: "5".into(),
            score: 1_735_689_600,
        });
        let score = command.find("1735689600").unwrap();
        let member = command.rfind("\r\n5\r\n").unwrap();
        assert!(score < member);
    }

    #[test]
    fn processing_key_suffix() {
        assert_eq!(processing_key("dirty:post"), "dirty:post:processing");
    }
}
