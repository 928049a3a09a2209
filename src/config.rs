//! Configuration for the validity estimator.
//!
//! Two layers, resolved once at estimator construction:
//!
//! 1. An optional TOML settings file, loaded from `--config`-style explicit
//!    paths, `~/.munin/config.toml`, or `/etc/munin/config.toml`.
//! 2. Process environment: `PROXY_MAX_AGE` selects the estimation strategy,
//!    `PROXY_CACHE_BLACKLIST` is a regex gating which methods may ever be
//!    assigned a TTL. Environment values take precedence over the file.
//!
//! Malformed configuration is never fatal: the estimator falls back to
//! passthrough mode (no cache-control headers, no verifiers) and logs once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::estimator::{MAXIMUM_CACHE_VALIDITY, MAX_VERIFIER_LIFETIME};
use crate::{MuninError, Result};

/// Strategy selection, parsed from a `PROXY_MAX_AGE`-style string.
///
/// Recognised forms:
///
/// | String | Variant |
/// |---|---|
/// | `static-<seconds>` | [`StrategySpec::Static`] |
/// | `dynamic-adaptive-<alpha>` | [`StrategySpec::Adaptive`] |
/// | `dynamic-updaterisk-<rho>` | [`StrategySpec::UpdateRisk`] |
/// | `dynamic-qualityelastic-<slo-ms>` | [`StrategySpec::QualityElastic`] |
/// | `dynamic-tbg1` | [`StrategySpec::Tbg1`] |
/// | `dynamic-simplistic` | [`StrategySpec::Simplistic`] |
/// | `dynamic-nyqvistish` | [`StrategySpec::Nyqvistish`] |
///
/// Anything structurally unparseable falls back to [`StrategySpec::Passthrough`];
/// a well-formed `dynamic-` prefix with an unknown strategy name falls back
/// to [`StrategySpec::Simplistic`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StrategySpec {
    /// Never emit a header, never create verifiers.
    Passthrough,
    /// Fixed TTL for every non-blacklisted response.
    Static(Duration),
    /// TTL proportional to time since the last observed change.
    Adaptive(f64),
    /// Update-risk based TTL (Lee et al., 2002) with acceptable risk rho.
    UpdateRisk(f64),
    /// Update-risk with rho derived from the p95 response time against an SLO.
    QualityElastic(Duration),
    /// EWMA of inter-change intervals with Nyquist-style oversampling.
    Tbg1,
    /// Half the observed unchanged span, fixed sampling interval.
    Simplistic,
    /// Half the observed unchanged span, interval follows the estimate.
    Nyqvistish,
}

impl StrategySpec {
    /// Parse a strategy specifier. Never fails; unusable input degrades to
    /// passthrough (or simplistic, for unknown dynamic names) with a warning.
    pub fn parse(value: &str) -> Self {
        if let Some(rest) = value.strip_prefix("dynamic-") {
            return Self::parse_dynamic(value, rest);
        }

        if let Some(age) = value.strip_prefix("static-") {
            return match age.parse::<u64>() {
                Ok(secs) => StrategySpec::Static(Duration::from_secs(secs)),
                Err(_) => {
                    warn!(value, "failed to parse static max-age, acting in passthrough mode");
                    StrategySpec::Passthrough
                }
            };
        }

        warn!(value, "unknown strategy specifier, acting in passthrough mode");
        StrategySpec::Passthrough
    }

    fn parse_dynamic(value: &str, rest: &str) -> Self {
        let mut parts = rest.splitn(2, '-');
        let name = parts.next().unwrap_or_default();
        let parameter = parts.next();

        match name {
            "adaptive" => match parameter.and_then(|p| p.parse::<f64>().ok()) {
                Some(alpha) => StrategySpec::Adaptive(alpha),
                None => {
                    warn!(value, "failed to parse alpha for adaptive strategy, acting in passthrough mode");
                    StrategySpec::Passthrough
                }
            },
            "updaterisk" => match parameter.and_then(|p| p.parse::<f64>().ok()) {
                Some(rho) => StrategySpec::UpdateRisk(rho),
                None => {
                    warn!(value, "failed to parse rho for update-risk strategy, acting in passthrough mode");
                    StrategySpec::Passthrough
                }
            },
            "qualityelastic" => match parameter.and_then(|p| p.parse::<u64>().ok()) {
                Some(slo_ms) => StrategySpec::QualityElastic(Duration::from_millis(slo_ms)),
                None => {
                    warn!(value, "failed to parse SLO for quality-elastic strategy, acting in passthrough mode");
                    StrategySpec::Passthrough
                }
            },
            "tbg1" => StrategySpec::Tbg1,
            "simplistic" => StrategySpec::Simplistic,
            "nyqvistish" => StrategySpec::Nyqvistish,
            other => {
                warn!(value, strategy = other, "unknown dynamic strategy, falling back to simplistic");
                StrategySpec::Simplistic
            }
        }
    }

    /// Whether this spec produces no estimates at all.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, StrategySpec::Passthrough)
    }
}

/// Immutable estimator configuration.
///
/// Built once, before any request flows; the estimator never re-reads the
/// process environment per observation.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// Selected estimation strategy.
    pub strategy: StrategySpec,
    /// Methods matching this pattern are never assigned a TTL.
    pub blacklist: Option<Regex>,
    /// Where to append the CSV estimation log. `None` disables the log.
    pub telemetry_path: Option<PathBuf>,
    /// Clamp on the advertised `max-age`, in whole seconds after rounding.
    pub max_validity: Duration,
    /// Wall-clock lifetime of each verifier.
    pub verifier_lifetime: Duration,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            strategy: StrategySpec::Passthrough,
            blacklist: None,
            telemetry_path: None,
            max_validity: MAXIMUM_CACHE_VALIDITY,
            verifier_lifetime: MAX_VERIFIER_LIFETIME,
        }
    }
}

impl EstimatorConfig {
    /// Create a passthrough config with default bounds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the estimation strategy.
    pub fn strategy(mut self, strategy: StrategySpec) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the method blacklist pattern. An invalid pattern is logged and
    /// ignored (no methods blacklisted), matching the never-fatal contract.
    pub fn blacklist(mut self, pattern: &str) -> Self {
        self.blacklist = compile_blacklist(pattern);
        self
    }

    /// Set the CSV estimation log path.
    pub fn telemetry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.telemetry_path = Some(path.into());
        self
    }

    /// Set the clamp on advertised TTLs.
    pub fn max_validity(mut self, bound: Duration) -> Self {
        self.max_validity = bound;
        self
    }

    /// Set the verifier lifetime.
    pub fn verifier_lifetime(mut self, lifetime: Duration) -> Self {
        self.verifier_lifetime = lifetime;
        self
    }

    /// Resolve configuration from a settings file plus environment overrides.
    ///
    /// `PROXY_MAX_AGE` and `PROXY_CACHE_BLACKLIST` take precedence over the
    /// corresponding file entries.
    pub fn resolve(settings: &Settings) -> Self {
        let mut config = Self::default();

        if let Some(secs) = settings.estimator.max_validity_secs {
            config.max_validity = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.estimator.verifier_lifetime_secs {
            config.verifier_lifetime = Duration::from_secs(secs);
        }
        config.telemetry_path = settings.telemetry.csv_path.clone();

        let max_age = std::env::var("PROXY_MAX_AGE")
            .ok()
            .or_else(|| settings.estimator.max_age.clone());
        config.strategy = match max_age {
            Some(value) => StrategySpec::parse(&value),
            None => StrategySpec::Passthrough,
        };

        let blacklist = std::env::var("PROXY_CACHE_BLACKLIST")
            .ok()
            .or_else(|| settings.estimator.cache_blacklist.clone());
        config.blacklist = blacklist.as_deref().and_then(compile_blacklist);

        config
    }

    /// Resolve configuration from the environment alone.
    pub fn from_env() -> Self {
        Self::resolve(&Settings::default())
    }
}

fn compile_blacklist(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(error) => {
            warn!(pattern, %error, "invalid cache blacklist pattern, no methods blacklisted");
            None
        }
    }
}

/// Deployment settings file.
///
/// Resolution order:
/// 1. Explicit path (if provided)
/// 2. `~/.munin/config.toml`
/// 3. `/etc/munin/config.toml`
///
/// A missing file is not an error — estimator behaviour is then driven by
/// environment variables alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub estimator: EstimatorSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// `[estimator]` section of the settings file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EstimatorSection {
    /// Default strategy specifier; overridden by `PROXY_MAX_AGE`.
    #[serde(default)]
    pub max_age: Option<String>,
    /// Default blacklist pattern; overridden by `PROXY_CACHE_BLACKLIST`.
    #[serde(default)]
    pub cache_blacklist: Option<String>,
    /// Clamp on advertised TTLs, in seconds.
    #[serde(default)]
    pub max_validity_secs: Option<u64>,
    /// Verifier lifetime, in seconds.
    #[serde(default)]
    pub verifier_lifetime_secs: Option<u64>,
}

/// `[telemetry]` section of the settings file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetrySection {
    /// Where to append the CSV estimation log.
    #[serde(default)]
    pub csv_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the standard locations.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let Some(path) = Self::resolve_path(explicit_path)? else {
            return Ok(Settings::default());
        };
        let content = std::fs::read_to_string(&path).map_err(|e| {
            MuninError::Configuration(format!("failed to read settings file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MuninError::Configuration(format!("failed to parse settings file {path:?}: {e}"))
        })
    }

    fn resolve_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MuninError::Configuration(format!(
                "settings file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_settings = home.join(".munin").join("config.toml");
            if user_settings.exists() {
                return Ok(Some(user_settings));
            }
        }

        let system_settings = PathBuf::from("/etc/munin/config.toml");
        if system_settings.exists() {
            return Ok(Some(system_settings));
        }

        Ok(None)
    }
}
