use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Duration, Instant},
};
use tracing::debug;

/// Caller-identity windows allow twice the network-identity limit.
const USER_LIMIT_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule {
    pub limit: u32,
    pub window_seconds: u64,
}

impl RateRule {
    pub const fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRule {
    pub prefix: String,
    #[serde(flatten)]
    pub rule: RateRule,
}

/// Per-endpoint limits. Lookups pick the longest configured prefix that
/// matches on a path-segment boundary, then fall back to `default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitTable {
    pub default: RateRule,
    #[serde(default)]
    pub endpoints: Vec<EndpointRule>,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self {
            default: RateRule::new(100, 60),
            endpoints: vec![
                EndpointRule {
                    prefix: "/jobs".into(),
                    rule: RateRule::new(30, 60),
                },
                EndpointRule {
                    prefix: "/jobs/scans".into(),
                    rule: RateRule::new(10, 60),
                },
                EndpointRule {
                    prefix: "/estimate".into(),
                    rule: RateRule::new(60, 60),
                },
                EndpointRule {
                    prefix: "/external/identify".into(),
                    rule: RateRule::new(30, 60),
                },
                EndpointRule {
                    prefix: "/external/market".into(),
                    rule: RateRule::new(60, 60),
                },
                EndpointRule {
                    prefix: "/external/sellability".into(),
                    rule: RateRule::new(20, 60),
                },
            ],
        }
    }
}

impl RateLimitTable {
    pub fn resolve(&self, path: &str) -> (&str, RateRule) {
        self.endpoints
            .iter()
            .filter(|entry| prefix_matches(path, &entry.prefix))
            .max_by_key(|entry| entry.prefix.len())
            .map(|entry| (entry.prefix.as_str(), entry.rule))
            .unwrap_or(("default", self.default))
    }
}

fn prefix_matches(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || !path.starts_with(prefix) {
        return false;
    }
    let rest = &path[prefix.len()..];
    rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/') || rest.starts_with('?')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: Instant,
}

impl RateDecision {
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }
}

struct WindowState {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window counters keyed by `(identity, endpoint bucket)`.
pub struct RateLimiter {
    table: RateLimitTable,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new(table: RateLimitTable) -> Self {
        Self {
            table,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one request. With a `user_id` both the network and the caller
    /// windows must admit it; `remaining` is the tighter of the two.
    pub async fn check(&self, identity: &str, path: &str, user_id: Option<&str>) -> RateDecision {
        let (bucket, rule) = self.table.resolve(path);
        let now = Instant::now();
        let mut guard = self.windows.lock().await;

        let network = hit(&mut guard, format!("net:{identity}:{bucket}"), rule, now);
        let decision = match user_id {
            Some(user) => {
                let user_rule = RateRule::new(
                    rule.limit.saturating_mul(USER_LIMIT_MULTIPLIER),
                    rule.window_seconds,
                );
                let caller = hit(&mut guard, format!("user:{user}:{bucket}"), user_rule, now);
                let binding = if caller.remaining < network.remaining {
                    caller
                } else {
                    network
                };
                RateDecision {
                    allowed: network.allowed && caller.allowed,
                    remaining: network.remaining.min(caller.remaining),
                    limit: rule.limit,
                    reset_at: if network.allowed && !caller.allowed {
                        caller.reset_at
                    } else if !network.allowed {
                        network.reset_at
                    } else {
                        binding.reset_at
                    },
                }
            }
            None => network,
        };
        drop(guard);

        if !decision.allowed {
            debug!(
                target = "flipscout.ratelimit",
                identity = identity,
                bucket = bucket,
                "rate_limit_denied"
            );
        }
        decision
    }

    /// Drops windows whose reset time has passed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.windows.lock().await;
        let before = guard.len();
        guard.retain(|_, window| window.reset_at > now);
        before - guard.len()
    }

    pub async fn tracked_windows(&self) -> usize {
        self.windows.lock().await.len()
    }

    /// Periodic sweep. The task ends once the last strong reference is gone.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                let removed = limiter.sweep().await;
                if removed > 0 {
                    debug!(target = "flipscout.ratelimit", removed, "rate_limit_sweep");
                }
            }
            debug!(target = "flipscout.ratelimit", "rate_limit_sweeper_stopped");
        })
    }
}

fn hit(
    windows: &mut HashMap<String, WindowState>,
    key: String,
    rule: RateRule,
    now: Instant,
) -> RateDecision {
    let window = windows.entry(key).or_insert_with(|| WindowState {
        count: 0,
        reset_at: now + rule.window(),
    });
    if now >= window.reset_at {
        window.count = 0;
        window.reset_at = now + rule.window();
    }
    window.count = window.count.saturating_add(1);
    RateDecision {
        allowed: window.count <= rule.limit,
        remaining: rule.limit.saturating_sub(window.count),
        limit: rule.limit,
        reset_at: window.reset_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(limit: u32, window_seconds: u64) -> RateLimitTable {
        RateLimitTable {
            default: RateRule::new(limit, window_seconds),
            endpoints: vec![
                EndpointRule {
                    prefix: "/x/y".into(),
                    rule: RateRule::new(5, 60),
                },
                EndpointRule {
                    prefix: "/x/y/z".into(),
                    rule: RateRule::new(2, 60),
                },
            ],
        }
    }

    #[test]
    fn resolves_most_specific_prefix() {
        let table = table(10, 60);
        assert_eq!(table.resolve("/x/y/z/1").0, "/x/y/z");
        assert_eq!(table.resolve("/x/y/other").0, "/x/y");
        assert_eq!(table.resolve("/x/yz").0, "default");
        assert_eq!(table.resolve("/health").1, RateRule::new(10, 60));
    }

    #[tokio::test(start_paused = true)]
    async fn allows_exactly_limit_then_denies_until_window_resets() {
        let limiter = RateLimiter::new(table(3, 10));
        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check("10.0.0.1", "/health", None).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 3);
        }
        let denied = limiter.check("10.0.0.1", "/health", None).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1", "/health", None).await.allowed);
        }
        assert!(!limiter.check("10.0.0.1", "/health", None).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn identities_and_buckets_are_independent() {
        let limiter = RateLimiter::new(table(1, 60));
        assert!(limiter.check("a", "/health", None).await.allowed);
        assert!(limiter.check("b", "/health", None).await.allowed);
        assert!(limiter.check("a", "/x/y/z", None).await.allowed);
        assert!(!limiter.check("a", "/health", None).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_identity_gets_double_limit_across_addresses() {
        let limiter = RateLimiter::new(table(2, 60));
        // Four different addresses, one user: the user window (2 x 2) binds.
        for (idx, ip) in ["1.1.1.1", "2.2.2.2", "3.3.3.3", "4.4.4.4"].iter().enumerate() {
            let decision = limiter.check(ip, "/health", Some("owner-1")).await;
            assert!(decision.allowed, "request {idx} should pass");
            assert_eq!(decision.remaining, (1u32).min(3 - idx as u32));
        }
        let denied = limiter.check("5.5.5.5", "/health", Some("owner-1")).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_windows() {
        let limiter = Arc::new(RateLimiter::new(table(5, 5)));
        limiter.check("a", "/health", None).await;
        limiter.check("b", "/health", Some("u")).await;
        assert_eq!(limiter.tracked_windows().await, 3);
        tokio::time::advance(Duration::from_secs(6)).await;
        limiter.check("c", "/x/y/z", None).await;
        assert_eq!(limiter.sweep().await, 3);
        assert_eq!(limiter.tracked_windows().await, 1);
    }

    #[test]
    fn parses_yaml_table() {
        let raw = r#"
default:
  limit: 50
  window_seconds: 60
endpoints:
  - prefix: /jobs/scans
    limit: 5
    window_seconds: 30
"#;
        let table: RateLimitTable = serde_yaml::from_str(raw).expect("yaml");
        assert_eq!(table.resolve("/jobs/scans").1, RateRule::new(5, 30));
        assert_eq!(table.resolve("/jobs/abc").1, RateRule::new(50, 60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_window() {
        let limiter = Arc::new(RateLimiter::new(table(10, 60)));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check("10.0.0.1", "/scan", None).await.allowed
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }
}
