//! Per-tool sliding-window admission control.
//!
//! Each tool owns an independent window guarded by its own lock, so a
//! saturated tool never blocks admission checks for the others. Windows are
//! created once, from the registry, and never added afterwards.

use conduit_config::ToolsConfig;
use conduit_core::tool::ToolRegistry;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Calls allowed per window for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_calls: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self { max_calls, window }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Denied { retry_after_secs: u64 },
}

struct Window {
    limit: RateLimit,
    calls: Mutex<VecDeque<Instant>>,
}

impl Window {
    fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            calls: Mutex::new(VecDeque::with_capacity(limit.max_calls as usize)),
        }
    }

    fn expire(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = calls.front() {
            if now.duration_since(oldest) >= self.limit.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct RateLimiter {
    windows: HashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(limits: impl IntoIterator<Item = (String, RateLimit)>) -> Self {
        Self {
            windows: limits
                .into_iter()
                .map(|(name, limit)| (name, Window::new(limit)))
                .collect(),
        }
    }

    /// One window per registered tool, limits taken from `[tools]` config.
    pub fn from_config(registry: &ToolRegistry, config: &ToolsConfig) -> Self {
        Self::new(registry.names().into_iter().map(|name| {
            let limit = config.rate_limit_for(name);
            (
                name.to_string(),
                RateLimit::new(limit.max_calls, limit.window()),
            )
        }))
    }

    /// Admit one call to `tool` and record it, or report how long to wait.
    ///
    /// Tools without a window are always admitted.
    pub fn try_acquire(&self, tool: &str) -> Admission {
        let Some(window) = self.windows.get(tool) else {
            return Admission::Granted;
        };
        let now = Instant::now();
        let mut calls = window.calls.lock().unwrap_or_else(|e| e.into_inner());
        window.expire(&mut calls, now);

        if calls.len() >= window.limit.max_calls as usize {
            let age = calls
                .front()
                .map(|oldest| now.duration_since(*oldest))
                .unwrap_or_default();
            let remaining = window.limit.window.saturating_sub(age);
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Admission::Denied {
                retry_after_secs: secs.max(1),
            };
        }

        calls.push_back(now);
        Admission::Granted
    }

    /// Calls currently inside `tool`'s window.
    pub fn in_window(&self, tool: &str) -> usize {
        let Some(window) = self.windows.get(tool) else {
            return 0;
        };
        let mut calls = window.calls.lock().unwrap_or_else(|e| e.into_inner());
        window.expire(&mut calls, Instant::now());
        calls.len()
    }

    pub fn limit_for(&self, tool: &str) -> Option<RateLimit> {
        self.windows.get(tool).map(|w| w.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_calls: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new([
            (
                "file_read".to_string(),
                RateLimit::new(max_calls, Duration::from_secs(window_secs)),
            ),
            (
                "grep".to_string(),
                RateLimit::new(max_calls, Duration::from_secs(window_secs)),
            ),
        ])
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_call_is_denied() {
        let limiter = limiter(10, 60);
        for _ in 0..10 {
            assert_eq!(limiter.try_acquire("file_read"), Admission::Granted);
        }
        match limiter.try_acquire("file_read") {
            Admission::Denied { retry_after_secs } => assert_eq!(retry_after_secs, 60),
            other => panic!("expected denial, got {other:?}"),
        }
        // Denials are not recorded
        assert_eq!(limiter.in_window("file_read"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_shrinks_with_age_of_oldest_call() {
        let limiter = limiter(2, 60);
        limiter.try_acquire("file_read");
        tokio::time::advance(Duration::from_secs(20)).await;
        limiter.try_acquire("file_read");
        tokio::time::advance(Duration::from_millis(500)).await;

        assert_eq!(
            limiter.try_acquire("file_read"),
            Admission::Denied {
                retry_after_secs: 40
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = limiter(2, 60);
        limiter.try_acquire("file_read");
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.try_acquire("file_read");
        assert!(matches!(
            limiter.try_acquire("file_read"),
            Admission::Denied { .. }
        ));

        // The first call expires; one slot opens.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(limiter.try_acquire("file_read"), Admission::Granted);
        assert!(matches!(
            limiter.try_acquire("file_read"),
            Admission::Denied { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn tools_are_independent() {
        let limiter = limiter(1, 60);
        assert_eq!(limiter.try_acquire("file_read"), Admission::Granted);
        assert!(matches!(
            limiter.try_acquire("file_read"),
            Admission::Denied { .. }
        ));
        assert_eq!(limiter.try_acquire("grep"), Admission::Granted);
    }

    #[test]
    fn unknown_tools_are_admitted_and_untracked() {
        let limiter = limiter(1, 60);
        assert_eq!(limiter.try_acquire("nope"), Admission::Granted);
        assert_eq!(limiter.try_acquire("nope"), Admission::Granted);
        assert_eq!(limiter.in_window("nope"), 0);
        assert!(limiter.limit_for("nope").is_none());
    }

    #[test]
    fn from_config_applies_overrides() {
        use conduit_config::ToolOverride;

        struct Named(&'static str);
        #[async_trait::async_trait]
        impl conduit_core::tool::Tool for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                ""
            }
            fn parameters_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object"})
            }
            async fn execute(
                &self,
                _arguments: serde_json::Value,
                _ctx: &conduit_core::tool::ToolContext,
            ) -> anyhow::Result<serde_json::Value> {
                Ok(serde_json::Value::Null)
            }
        }

        let registry = ToolRegistry::builder()
            .register(Named("bash_exec"))
            .register(Named("grep"))
            .build()
            .unwrap();
        let mut config = ToolsConfig::default();
        config.overrides.insert(
            "bash_exec".into(),
            ToolOverride {
                max_calls: Some(3),
                window_secs: Some(10),
                timeout_secs: None,
            },
        );

        let limiter = RateLimiter::from_config(&registry, &config);
        assert_eq!(
            limiter.limit_for("bash_exec"),
            Some(RateLimit::new(3, Duration::from_secs(10)))
        );
        assert_eq!(limiter.limit_for("grep"), Some(RateLimit::default()));
    }
}
