use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "health", rename_all = "snake_case")]
pub enum HealthOutcome {
    Healthy { attempts: u32 },
    /// Never answered 2xx within the timeout. `last_error` is the final
    /// transport error or status seen.
    Unhealthy { attempts: u32, last_error: String },
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthOutcome::Healthy { .. })
    }
}

/// Poll `url` until it answers 2xx or `timeout` elapses.
///
/// At least one request is always made. Each request gets its own timeout of
/// `interval` so a hung server cannot stall the loop.
pub fn wait_healthy(url: &str, interval: Duration, timeout: Duration) -> HealthOutcome {
    let agent = ureq::AgentBuilder::new()
        .timeout(interval.max(Duration::from_millis(200)))
        .build();
    let deadline = Instant::now() + timeout;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let last_error = match agent.get(url).call() {
            Ok(resp) if (200..300).contains(&resp.status()) => {
                tracing::info!(url, attempts, "health check passed");
                return HealthOutcome::Healthy { attempts };
            }
            Ok(resp) => format!("HTTP {}", resp.status()),
            Err(ureq::Error::Status(code, _)) => format!("HTTP {code}"),
            Err(e) => e.to_string(),
        };
        tracing::debug!(url, attempts, error = %last_error, "health check not ready");

        if Instant::now() + interval > deadline {
            return HealthOutcome::Unhealthy {
                attempts,
                last_error,
            };
        }
        std::thread::sleep(interval);
    }
}
