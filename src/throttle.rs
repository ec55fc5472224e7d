use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Tokens granted per refill window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleLimit {
    pub tokens: u32,
    pub interval: Duration,
}

impl ThrottleLimit {
    pub const fn per_interval_ms(tokens: u32, interval_ms: u64) -> Self {
        Self {
            tokens,
            interval: Duration::from_millis(interval_ms),
        }
    }
}

/// Throttle ceilings inherited from the source system. Implementations must
/// not exceed these regardless of deployment size.
pub mod limits {
    use super::ThrottleLimit;

    pub const APP_REGISTRY: ThrottleLimit = ThrottleLimit::per_interval_ms(5, 1000);
    pub const ORGANIZATIONS: ThrottleLimit = ThrottleLimit::per_interval_ms(1, 1000);
    pub const GATEWAY_PAGINATOR: ThrottleLimit = ThrottleLimit::per_interval_ms(5, 2000);
    pub const GATEWAY_TOTAL: ThrottleLimit = ThrottleLimit::per_interval_ms(10, 1000);
    pub const APPSYNC: ThrottleLimit = ThrottleLimit::per_interval_ms(5, 1000);
    pub const CONFIG_SELECT_AGGREGATE: ThrottleLimit = ThrottleLimit::per_interval_ms(8, 1000);
    pub const CONFIG_BATCH_GET_AGGREGATE: ThrottleLimit = ThrottleLimit::per_interval_ms(15, 1000);
    pub const ECS_CLUSTER_READS: ThrottleLimit = ThrottleLimit::per_interval_ms(20, 1000);
    pub const EKS_DESCRIBE_NODEGROUP: ThrottleLimit = ThrottleLimit::per_interval_ms(5, 1000);
    pub const ELB_DESCRIBE: ThrottleLimit = ThrottleLimit::per_interval_ms(10, 1000);
    pub const MEDIACONNECT_LIST: ThrottleLimit = ThrottleLimit::per_interval_ms(5, 1000);
    pub const DYNAMODB_STREAMS_DESCRIBE: ThrottleLimit = ThrottleLimit::per_interval_ms(8, 1000);
}

#[derive(Debug)]
struct BucketState {
    available: u32,
    window_start: Instant,
}

/// A fixed-window token bucket. `acquire` suspends the caller until a token
/// is free; the window replenishes to full capacity every interval.
#[derive(Debug)]
pub struct TokenBucket {
    limit: ThrottleLimit,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(limit: ThrottleLimit) -> Self {
        Self {
            limit,
            state: Mutex::new(BucketState {
                available: limit.tokens,
                window_start: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait_until = {
                let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
                let now = Instant::now();
                if now.duration_since(state.window_start) >= self.limit.interval {
                    state.window_start = now;
                    state.available = self.limit.tokens;
                }
                if state.available > 0 {
                    state.available -= 1;
                    return;
                }
                state.window_start + self.limit.interval
            };
            tokio::time::sleep_until(wait_until).await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ThrottleKey {
    name: String,
    principal: String,
    region: String,
}

/// Memoizes token buckets by `(name, principal, region)` so that multiple
/// adapters minted for the same principal share a single ceiling.
#[derive(Debug, Default)]
pub struct ThrottleRegistry {
    buckets: Mutex<HashMap<ThrottleKey, Arc<TokenBucket>>>,
}

impl ThrottleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(
        &self,
        name: &str,
        principal: &str,
        region: &str,
        limit: ThrottleLimit,
    ) -> Arc<TokenBucket> {
        let key = ThrottleKey {
            name: name.to_string(),
            principal: principal.to_string(),
            region: region.to_string(),
        };
        let mut buckets = self.buckets.lock().unwrap_or_else(|err| err.into_inner());
        Arc::clone(
            buckets
                .entry(key)
                .or_insert_with(|| Arc::new(TokenBucket::new(limit))),
        )
    }
}
