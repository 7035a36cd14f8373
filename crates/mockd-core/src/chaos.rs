//! Chaos engine: latency injection, error rates, timeouts, circuit
//! breakers, and the named profiles
//!
//! Probabilities are clamped to [0, 1] on every write path, so handlers
//! never observe an out-of-range configuration. Per-path overrides take
//! precedence over the global settings.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Latency distribution tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyDistribution {
    #[default]
    Uniform,
    Normal,
    Pareto,
}

/// Latency window with a distribution tag
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatencySpec {
    pub min_ms: u64,
    pub max_ms: u64,
    #[serde(default)]
    pub distribution: LatencyDistribution,
}

impl LatencySpec {
    /// Draw a latency from the window. Always within [min_ms, max_ms].
    pub fn draw(&self) -> Duration {
        let mut rng = rand::rng();
        let (min, max) = (self.min_ms.min(self.max_ms), self.min_ms.max(self.max_ms));
        if min == max {
            return Duration::from_millis(min);
        }
        let ms = match self.distribution {
            LatencyDistribution::Uniform => rng.random_range(min..=max),
            LatencyDistribution::Normal => {
                // Box-Muller around the window midpoint
                let mean = (min + max) as f64 / 2.0;
                let std_dev = (max - min) as f64 / 6.0;
                let u1: f64 = rng.random();
                let u2: f64 = rng.random();
                let z = (-2.0 * u1.max(f64::MIN_POSITIVE).ln()).sqrt()
                    * (2.0 * std::f64::consts::PI * u2).cos();
                (mean + z * std_dev).max(0.0) as u64
            }
            LatencyDistribution::Pareto => {
                // Heavy tail anchored at the window floor
                let alpha = 1.5;
                let u: f64 = rng.random_range(f64::EPSILON..1.0);
                let scaled = min as f64 / u.powf(1.0 / alpha);
                scaled as u64
            }
        };
        Duration::from_millis(ms.clamp(min, max))
    }
}

/// Per-path overrides; any unset field falls back to the global setting
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChaosOverride {
    pub latency: Option<LatencySpec>,
    pub error_rate: Option<f64>,
    pub error_statuses: Option<Vec<u16>>,
    pub timeout_probability: Option<f64>,
}

/// Stateful fault: trips open after a number of requests through a path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSpec {
    /// Path prefix the breaker guards (e.g. a stateful resource base path)
    pub path_prefix: String,
    /// Trip open after this many requests
    pub trip_after: u32,
    /// Stay open for this long
    pub open_ms: u64,
    /// Advertised Retry-After, in seconds
    #[serde(default)]
    pub retry_after_s: u64,
}

/// The chaos configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChaosSettings {
    pub enabled: bool,
    pub latency: Option<LatencySpec>,
    /// Probability of answering with an error status
    pub error_rate: f64,
    /// Candidate statuses drawn uniformly on an error roll
    pub error_statuses: Vec<u16>,
    /// Probability of a chaos-induced timeout
    pub timeout_probability: f64,
    /// How long a timed-out connection is held before closing
    pub timeout_ms: u64,
    /// Retry-After advertised with rate-limit style errors, seconds
    pub retry_after_s: Option<u64>,
    /// Path-prefix keyed overrides, most specific prefix wins
    pub per_path: HashMap<String, ChaosOverride>,
    pub circuit_breakers: Vec<CircuitBreakerSpec>,
}

impl ChaosSettings {
    /// Clamp every probability into [0, 1]; invalid values never survive a
    /// write
    pub fn clamp(&mut self) {
        self.error_rate = self.error_rate.clamp(0.0, 1.0);
        self.timeout_probability = self.timeout_probability.clamp(0.0, 1.0);
        for over in self.per_path.values_mut() {
            if let Some(rate) = over.error_rate.as_mut() {
                *rate = rate.clamp(0.0, 1.0);
            }
            if let Some(p) = over.timeout_probability.as_mut() {
                *p = p.clamp(0.0, 1.0);
            }
        }
        if self.error_statuses.is_empty() {
            self.error_statuses = vec![500, 502, 503];
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = 30_000;
        }
    }
}

/// What the chaos pre-check decided for one request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaosDecision {
    pub action: ChaosAction,
    /// Latency to add on top of the mock's own delay
    pub extra_latency: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum ChaosAction {
    #[default]
    None,
    /// Hold the connection until the deadline, then close without a body
    Timeout { hold: Duration },
    /// Answer with the drawn status instead of the mock response
    Error {
        status: u16,
        retry_after_s: Option<u64>,
    },
}

#[derive(Debug, Default)]
struct BreakerState {
    hits: u32,
    open_until: Option<Instant>,
}

/// The engine: settings behind a read-write lock, breaker state aside
#[derive(Debug, Default)]
pub struct ChaosEngine {
    settings: RwLock<ChaosSettings>,
    breakers: parking_lot::Mutex<HashMap<String, BreakerState>>,
}

impl ChaosEngine {
    pub fn new(mut settings: ChaosSettings) -> Self {
        settings.clamp();
        Self {
            settings: RwLock::new(settings),
            breakers: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub async fn settings(&self) -> ChaosSettings {
        self.settings.read().await.clone()
    }

    pub async fn update(&self, mut settings: ChaosSettings) {
        settings.clamp();
        *self.settings.write().await = settings;
        self.breakers.lock().clear();
        info!("chaos settings updated");
    }

    /// Replace settings with a named profile. Unknown names are an error.
    pub async fn apply_profile(&self, name: &str) -> Option<ChaosSettings> {
        let settings = profile(name)?;
        self.update(settings.clone()).await;
        info!(profile = name, "chaos profile applied");
        Some(settings)
    }

    pub async fn reset(&self) {
        *self.settings.write().await = ChaosSettings::default();
        self.breakers.lock().clear();
        info!("chaos reset");
    }

    /// Roll the dice for one request. Never suspends; the caller applies
    /// the decision (sleeps, error responses, held connections).
    pub async fn decide(&self, path: &str) -> ChaosDecision {
        let settings = self.settings.read().await.clone();
        if !settings.enabled {
            return ChaosDecision::default();
        }

        if let Some(action) = self.check_breakers(&settings, path) {
            return ChaosDecision {
                action,
                extra_latency: None,
            };
        }

        // Longest matching per-path override wins
        let over = settings
            .per_path
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, over)| over.clone())
            .unwrap_or_default();

        let timeout_p = over
            .timeout_probability
            .unwrap_or(settings.timeout_probability);
        let error_rate = over.error_rate.unwrap_or(settings.error_rate);
        let statuses = over
            .error_statuses
            .unwrap_or_else(|| settings.error_statuses.clone());
        let latency = over.latency.or(settings.latency);

        let mut rng = rand::rng();
        if timeout_p > 0.0 && rng.random_bool(timeout_p) {
            debug!(path, "chaos timeout injected");
            return ChaosDecision {
                action: ChaosAction::Timeout {
                    hold: Duration::from_millis(settings.timeout_ms),
                },
                extra_latency: None,
            };
        }
        if error_rate > 0.0 && rng.random_bool(error_rate) {
            let status = statuses[rng.random_range(0..statuses.len())];
            debug!(path, status, "chaos error injected");
            return ChaosDecision {
                action: ChaosAction::Error {
                    status,
                    retry_after_s: settings.retry_after_s,
                },
                extra_latency: latency.map(|l| l.draw()),
            };
        }
        ChaosDecision {
            action: ChaosAction::None,
            extra_latency: latency.map(|l| l.draw()),
        }
    }

    fn check_breakers(&self, settings: &ChaosSettings, path: &str) -> Option<ChaosAction> {
        let spec = settings
            .circuit_breakers
            .iter()
            .find(|b| path.starts_with(b.path_prefix.as_str()))?;
        let mut breakers = self.breakers.lock();
        let state = breakers.entry(spec.path_prefix.clone()).or_default();

        if let Some(open_until) = state.open_until {
            if Instant::now() < open_until {
                return Some(ChaosAction::Error {
                    status: 503,
                    retry_after_s: Some(spec.retry_after_s),
                });
            }
            state.open_until = None;
            state.hits = 0;
        }

        state.hits += 1;
        if state.hits >= spec.trip_after {
            state.open_until = Some(Instant::now() + Duration::from_millis(spec.open_ms));
            state.hits = 0;
            debug!(prefix = %spec.path_prefix, "circuit breaker tripped open");
            return Some(ChaosAction::Error {
                status: 503,
                retry_after_s: Some(spec.retry_after_s),
            });
        }
        None
    }
}

/// Predefined named profiles
pub fn profile(name: &str) -> Option<ChaosSettings> {
    let mut settings = match name {
        "slow-api" => ChaosSettings {
            latency: Some(LatencySpec {
                min_ms: 800,
                max_ms: 2000,
                distribution: LatencyDistribution::Uniform,
            }),
            ..Default::default()
        },
        "degraded" => ChaosSettings {
            latency: Some(LatencySpec {
                min_ms: 300,
                max_ms: 1500,
                distribution: LatencyDistribution::Uniform,
            }),
            error_rate: 0.1,
            ..Default::default()
        },
        "flaky" => ChaosSettings {
            latency: Some(LatencySpec {
                min_ms: 50,
                max_ms: 300,
                distribution: LatencyDistribution::Uniform,
            }),
            error_rate: 0.25,
            error_statuses: vec![500, 502, 503],
            ..Default::default()
        },
        "offline" => ChaosSettings {
            error_rate: 1.0,
            error_statuses: vec![503],
            ..Default::default()
        },
        "timeout" => ChaosSettings {
            timeout_probability: 1.0,
            ..Default::default()
        },
        "rate-limited" => ChaosSettings {
            error_rate: 0.5,
            error_statuses: vec![429],
            retry_after_s: Some(30),
            ..Default::default()
        },
        "mobile-3g" => ChaosSettings {
            latency: Some(LatencySpec {
                min_ms: 200,
                max_ms: 600,
                distribution: LatencyDistribution::Normal,
            }),
            ..Default::default()
        },
        "satellite" => ChaosSettings {
            latency: Some(LatencySpec {
                min_ms: 600,
                max_ms: 1800,
                distribution: LatencyDistribution::Normal,
            }),
            ..Default::default()
        },
        "dns-flaky" => ChaosSettings {
            latency: Some(LatencySpec {
                min_ms: 100,
                max_ms: 400,
                distribution: LatencyDistribution::Pareto,
            }),
            error_rate: 0.15,
            error_statuses: vec![502, 504],
            ..Default::default()
        },
        "overloaded" => ChaosSettings {
            latency: Some(LatencySpec {
                min_ms: 500,
                max_ms: 3000,
                distribution: LatencyDistribution::Pareto,
            }),
            error_rate: 0.3,
            error_statuses: vec![503],
            ..Default::default()
        },
        _ => return None,
    };
    settings.enabled = true;
    settings.clamp();
    Some(settings)
}

/// The profile names, for the admin surface
pub const PROFILE_NAMES: &[&str] = &[
    "slow-api",
    "degraded",
    "flaky",
    "offline",
    "timeout",
    "rate-limited",
    "mobile-3g",
    "satellite",
    "dns-flaky",
    "overloaded",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_clamp_on_write() {
        let mut settings = ChaosSettings {
            error_rate: 7.5,
            timeout_probability: -2.0,
            ..Default::default()
        };
        settings.clamp();
        assert_eq!(settings.error_rate, 1.0);
        assert_eq!(settings.timeout_probability, 0.0);
    }

    #[test]
    fn latency_draw_stays_in_window() {
        for distribution in [
            LatencyDistribution::Uniform,
            LatencyDistribution::Normal,
            LatencyDistribution::Pareto,
        ] {
            let spec = LatencySpec {
                min_ms: 100,
                max_ms: 100,
                distribution,
            };
            assert_eq!(spec.draw(), Duration::from_millis(100));

            let spec = LatencySpec {
                min_ms: 50,
                max_ms: 200,
                distribution,
            };
            for _ in 0..200 {
                let drawn = spec.draw().as_millis() as u64;
                assert!((50..=200).contains(&drawn), "{drawn} out of window");
            }
        }
    }

    #[tokio::test]
    async fn disabled_engine_never_injects() {
        let engine = ChaosEngine::new(ChaosSettings {
            error_rate: 1.0,
            ..Default::default()
        });
        for _ in 0..20 {
            assert_eq!(engine.decide("/x").await, ChaosDecision::default());
        }
    }

    #[tokio::test]
    async fn error_rate_one_always_errors() {
        let engine = ChaosEngine::new(ChaosSettings {
            enabled: true,
            error_rate: 1.0,
            error_statuses: vec![503],
            ..Default::default()
        });
        for _ in 0..20 {
            let decision = engine.decide("/x").await;
            assert!(matches!(
                decision.action,
                ChaosAction::Error { status: 503, .. }
            ));
        }
    }

    #[tokio::test]
    async fn per_path_override_beats_global() {
        let engine = ChaosEngine::new(ChaosSettings {
            enabled: true,
            error_rate: 1.0,
            error_statuses: vec![500],
            per_path: HashMap::from([(
                "/healthy".to_string(),
                ChaosOverride {
                    error_rate: Some(0.0),
                    ..Default::default()
                },
            )]),
            ..Default::default()
        });
        assert_eq!(
            engine.decide("/healthy/ping").await.action,
            ChaosAction::None
        );
        assert!(matches!(
            engine.decide("/other").await.action,
            ChaosAction::Error { .. }
        ));
    }

    #[tokio::test]
    async fn timeout_profile_times_out() {
        let engine = ChaosEngine::new(ChaosSettings::default());
        engine.apply_profile("timeout").await.expect("profile");
        let decision = engine.decide("/x").await;
        assert!(matches!(decision.action, ChaosAction::Timeout { .. }));
    }

    #[tokio::test]
    async fn unknown_profile_is_none() {
        let engine = ChaosEngine::new(ChaosSettings::default());
        assert!(engine.apply_profile("no-such-profile").await.is_none());
    }

    #[tokio::test]
    async fn circuit_breaker_trips_and_recovers() {
        let engine = ChaosEngine::new(ChaosSettings {
            enabled: true,
            circuit_breakers: vec![CircuitBreakerSpec {
                path_prefix: "/api/users".to_string(),
                trip_after: 3,
                open_ms: 50,
                retry_after_s: 1,
            }],
            ..Default::default()
        });

        assert_eq!(engine.decide("/api/users").await.action, ChaosAction::None);
        assert_eq!(engine.decide("/api/users").await.action, ChaosAction::None);
        // Third request trips the breaker
        assert!(matches!(
            engine.decide("/api/users").await.action,
            ChaosAction::Error { status: 503, .. }
        ));
        // Held open while the window lasts
        assert!(matches!(
            engine.decide("/api/users").await.action,
            ChaosAction::Error { status: 503, .. }
        ));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(engine.decide("/api/users").await.action, ChaosAction::None);
    }

    #[test]
    fn every_named_profile_resolves() {
        for name in PROFILE_NAMES {
            let settings = profile(name).unwrap_or_else(|| panic!("missing profile {name}"));
            assert!(settings.enabled);
            assert!(settings.error_rate <= 1.0);
        }
    }
}
