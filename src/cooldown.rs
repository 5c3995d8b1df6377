//! Adaptive backoff shared by every caller of a quota-limited service.
//!
//! Each external service gets a string key (`embedding:openai`,
//! `vector:qdrant`, ...). Its current backoff lives in a [`CooldownStorage`]
//! rather than in process memory, so independent workers hitting the same
//! service see one shared signal.
//!
//! Before a call the stored pause decays linearly with the time since it was
//! written:
//!
//! ```text
//! remaining = cooldown_seconds - recovery_factor * elapsed_seconds
//! ```
//!
//! A positive remainder is slept off. On a rate-limit error the next pause is
//! `max(pause * exp_base, initial_seconds)`, persisted, and the call retried
//! until `max_attempts` calls have been made. Success writes nothing. Errors
//! that are not rate limits propagate untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::CooldownConfig;
use crate::error::{Error, Result};
use crate::models::CooldownState;

/// Where cooldown state is persisted. Implementations must be shareable
/// across processes to be useful beyond a single worker.
#[async_trait]
pub trait CooldownStorage: Send + Sync {
    async fn read(&self, service_key: &str) -> Result<Option<CooldownState>>;

    /// Overwrite the state for `service_key`, stamping it with the current time.
    async fn write(&self, service_key: &str, cooldown_seconds: f64) -> Result<()>;
}

/// Cooldown rows in the `service_cooldowns` table.
pub struct SqliteCooldownStorage {
    pool: SqlitePool,
}

impl SqliteCooldownStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CooldownStorage for SqliteCooldownStorage {
    async fn read(&self, service_key: &str) -> Result<Option<CooldownState>> {
        let row = sqlx::query(
            "SELECT cooldown_seconds, updated_at_ms FROM service_cooldowns WHERE service_key = ?",
        )
        .bind(service_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let updated_at_ms: i64 = r.get("updated_at_ms");
            CooldownState {
                cooldown_seconds: r.get("cooldown_seconds"),
                updated_at: DateTime::from_timestamp_millis(updated_at_ms).unwrap_or_default(),
            }
        }))
    }

    async fn write(&self, service_key: &str, cooldown_seconds: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_cooldowns (service_key, cooldown_seconds, updated_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(service_key) DO UPDATE SET
                cooldown_seconds = excluded.cooldown_seconds,
                updated_at_ms = excluded.updated_at_ms
            "#,
        )
        .bind(service_key)
        .bind(cooldown_seconds)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Process-local storage, for tests and single-worker setups.
#[derive(Default)]
pub struct MemoryCooldownStorage {
    states: Mutex<HashMap<String, CooldownState>>,
}

impl MemoryCooldownStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a state with an explicit timestamp.
    pub fn insert(&self, service_key: &str, state: CooldownState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(service_key.to_string(), state);
        }
    }
}

#[async_trait]
impl CooldownStorage for MemoryCooldownStorage {
    async fn read(&self, service_key: &str) -> Result<Option<CooldownState>> {
        let states = self
            .states
            .lock()
            .map_err(|_| anyhow::anyhow!("cooldown state lock poisoned"))?;
        Ok(states.get(service_key).cloned())
    }

    async fn write(&self, service_key: &str, cooldown_seconds: f64) -> Result<()> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| anyhow::anyhow!("cooldown state lock poisoned"))?;
        states.insert(
            service_key.to_string(),
            CooldownState {
                cooldown_seconds,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

/// Seconds still to wait before calling, given the stored state. Never negative.
pub fn remaining_pause(
    state: Option<&CooldownState>,
    recovery_factor: f64,
    now: DateTime<Utc>,
) -> f64 {
    let Some(state) = state else {
        return 0.0;
    };
    let elapsed = (now - state.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
    (state.cooldown_seconds - recovery_factor * elapsed).max(0.0)
}

/// Wraps calls to rate-limited services with the persisted adaptive backoff.
#[derive(Clone)]
pub struct ServiceCooldown {
    storage: Arc<dyn CooldownStorage>,
    config: CooldownConfig,
}

impl ServiceCooldown {
    pub fn new(storage: Arc<dyn CooldownStorage>, config: CooldownConfig) -> Self {
        Self { storage, config }
    }

    /// Run `op` under the cooldown for `service_key`, retrying errors for
    /// which [`Error::is_rate_limit`] holds.
    pub async fn call<T, F, Fut>(&self, service_key: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.call_with(service_key, Error::is_rate_limit, op).await
    }

    /// Like [`call`](Self::call) with a caller-supplied rate-limit classifier.
    pub async fn call_with<T, F, Fut, C>(
        &self,
        service_key: &str,
        is_rate_limit: C,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let state = self.storage.read(service_key).await?;
        let mut pause = remaining_pause(state.as_ref(), self.config.recovery_factor, Utc::now());
        let mut attempt: u32 = 1;

        loop {
            if pause > 0.0 {
                tracing::warn!(service_key, seconds = pause, "service cooldown backoff");
                tokio::time::sleep(Duration::from_secs_f64(pause)).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !is_rate_limit(&err) => return Err(err),
                Err(err) => {
                    tracing::warn!(service_key, attempt, error = %err, "service cooldown rate limit error");

                    if attempt >= self.config.max_attempts {
                        tracing::error!(service_key, seconds = pause, "service cooldown give up");
                        return Err(err);
                    }

                    attempt += 1;
                    pause = (pause * self.config.exp_base).max(self.config.initial_seconds);
                    self.storage.write(service_key, pause).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_attempts: u32) -> CooldownConfig {
        CooldownConfig {
            initial_seconds: 5.0,
            max_attempts,
            recovery_factor: 0.5,
            exp_base: 1.5,
        }
    }

    fn rate_limited() -> Error {
        Error::RateLimited {
            service: "svc".into(),
            message: "429".into(),
        }
    }

    #[test]
    fn pause_decays_linearly_and_clamps_at_zero() {
        let now = Utc::now();
        let state = CooldownState {
            cooldown_seconds: 10.0,
            updated_at: now - chrono::Duration::seconds(10),
        };
        assert!((remaining_pause(Some(&state), 0.5, now) - 5.0).abs() < 1e-9);

        let stale = CooldownState {
            cooldown_seconds: 10.0,
            updated_at: now - chrono::Duration::seconds(20),
        };
        assert_eq!(remaining_pause(Some(&stale), 0.5, now), 0.0);

        let long_gone = CooldownState {
            cooldown_seconds: 10.0,
            updated_at: now - chrono::Duration::hours(1),
        };
        assert_eq!(remaining_pause(Some(&long_gone), 0.5, now), 0.0);
        assert_eq!(remaining_pause(None, 0.5, now), 0.0);
    }

    #[test]
    fn full_recovery_factor_decays_in_one_cooldown_span() {
        let now = Utc::now();
        let state = CooldownState {
            cooldown_seconds: 10.0,
            updated_at: now - chrono::Duration::seconds(10),
        };
        assert_eq!(remaining_pause(Some(&state), 1.0, now), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_and_grows_pause() {
        let storage = Arc::new(MemoryCooldownStorage::new());
        let cooldown = ServiceCooldown::new(storage.clone(), config(5));
        let calls = AtomicU32::new(0);

        let result = cooldown
            .call("svc", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let state = storage.read("svc").await.unwrap().unwrap();
        assert!((state.cooldown_seconds - 7.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let storage = Arc::new(MemoryCooldownStorage::new());
        let cooldown = ServiceCooldown::new(storage, config(3));
        let calls = AtomicU32::new(0);

        let err = cooldown
            .call("svc", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(rate_limited())
            })
            .await
            .unwrap_err();

        assert!(err.is_rate_limit());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stored_pause_is_slept_before_the_first_call() {
        let storage = Arc::new(MemoryCooldownStorage::new());
        storage.insert(
            "svc",
            CooldownState {
                cooldown_seconds: 10.0,
                updated_at: Utc::now(),
            },
        );
        let cooldown = ServiceCooldown::new(storage, config(5));

        let start = tokio::time::Instant::now();
        let ran_at = cooldown
            .call("svc", || async { Ok(tokio::time::Instant::now()) })
            .await
            .unwrap();

        let waited = ran_at - start;
        assert!(waited > Duration::from_millis(9_500), "{waited:?}");
        assert!(waited <= Duration::from_secs(10), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn workers_sharing_storage_see_each_others_backoff() {
        let storage: Arc<dyn CooldownStorage> = Arc::new(MemoryCooldownStorage::new());
        let first = ServiceCooldown::new(storage.clone(), config(5));
        let calls = AtomicU32::new(0);

        first
            .call("svc", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(rate_limited())
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let second = ServiceCooldown::new(storage.clone(), config(5));
        let start = tokio::time::Instant::now();
        let ran_at = second
            .call("svc", || async { Ok(tokio::time::Instant::now()) })
            .await
            .unwrap();

        let waited = ran_at - start;
        assert!(waited > Duration::from_millis(4_500), "{waited:?}");
        assert!(waited <= Duration::from_secs(5), "{waited:?}");

        let other = ServiceCooldown::new(storage, config(5));
        let start = tokio::time::Instant::now();
        let ran_at = other
            .call("other", || async { Ok(tokio::time::Instant::now()) })
            .await
            .unwrap();
        assert_eq!(ran_at, start);
    }

    #[tokio::test]
    async fn other_errors_propagate_without_state_change() {
        let storage = Arc::new(MemoryCooldownStorage::new());
        let cooldown = ServiceCooldown::new(storage.clone(), config(5));
        let calls = AtomicU32::new(0);

        let err = cooldown
            .call("svc", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::EmptyEmbedding {
                    item_id: "1".into(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::EmptyEmbedding { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(storage.read("svc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn success_does_not_write_state() {
        let storage = Arc::new(MemoryCooldownStorage::new());
        let cooldown = ServiceCooldown::new(storage.clone(), config(5));

        cooldown.call("svc", || async { Ok(1) }).await.unwrap();
        assert!(storage.read("svc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_storage_overwrites_latest_state() {
        let (_tmp, pool) = testing::pool().await;
        let storage = SqliteCooldownStorage::new(pool);

        assert!(storage.read("embedding:openai").await.unwrap().is_none());
        storage.write("embedding:openai", 5.0).await.unwrap();
        storage.write("embedding:openai", 7.5).await.unwrap();

        let state = storage.read("embedding:openai").await.unwrap().unwrap();
        assert!((state.cooldown_seconds - 7.5).abs() < 1e-9);
        assert!(Utc::now() - state.updated_at < chrono::Duration::minutes(1));
        assert!(storage.read("vector:qdrant").await.unwrap().is_none());
    }
}
