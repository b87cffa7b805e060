// =============================================================================
// config.rs — THE GRAND CONFIGURATION CATHEDRAL
// =============================================================================
//
// Every system needs configuration, but not every system needs THIS MUCH
// configuration. We have knobs for knobs. Throttles for throttles.
// Thresholds that decide when other thresholds get to fire.
//
// All values can be overridden via environment variables, because
// hardcoding configuration is how you end up on the front page of Hacker
// News for the wrong reasons.
//
// Default values have been carefully chosen through a rigorous process of
// "that's what the gazette tolerates" and "the clerk's API will fall over
// if we go faster than this."
// =============================================================================

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;
use url::Url;

use crate::detector::RetryPolicy;

/// The mandatory search terms a run uses unless the caller overrides
/// them. These are the phrases that reliably mark an RPV publication;
/// two of them must co-occur before a notice qualifies.
pub const DEFAULT_SEARCH_TERMS: [&str; 5] = [
    "RPV",
    "pagamento pelo INSS",
    "Requisição de Pequeno Valor",
    "INSTITUTO NACIONAL DO SEGURO SOCIAL",
    "INSS",
];

/// The Grand Configuration Struct. Every tunable parameter in the entire
/// engine lives here. If you need to change something, this is where you
/// come. Think of it as the cockpit of a fighter jet, except instead of
/// weapons systems you're controlling how politely we interrogate a
/// judicial bulletin from 2006.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // UPSTREAM ENDPOINTS
    // =========================================================================
    /// The gazette query page. The real one. The one with the bouncer.
    pub gazette_base_url: String,

    /// The WebDriver endpoint driving the headless browser.
    /// Default: a local chromedriver on its default port.
    pub webdriver_url: String,

    /// The persistence API base URL. Records are POSTed to
    /// {api_url}/api/publicacoes and upserted by process number.
    pub api_url: String,

    // =========================================================================
    // SEARCH PARAMETERS
    // =========================================================================
    /// Comma-separated term override. Empty means the defaults apply.
    pub search_terms_csv: String,

    /// Upper bound on a custom range, in days. Thirty days of gazette is
    /// already a lot of legalese; more than that is a batch job, not a run.
    pub max_range_days: i64,

    /// Bounds for the quick "last N days" entry point.
    pub max_days_back: i64,

    // =========================================================================
    // RETRY AND THROTTLE KNOBS
    // The numbers that keep us merely persistent instead of bannable.
    // =========================================================================
    /// Attempts per gazette date before giving up on it.
    pub max_attempts_per_date: u32,

    /// Consecutive failed dates before the run declares the site blocked.
    pub consecutive_fault_threshold: u32,

    /// Pause before reloading the query page for a retry.
    pub reload_delay: Duration,

    /// Pause between successive gazette dates.
    pub per_date_throttle: Duration,

    /// Minimum gap between whole runs. A run that arrives early waits
    /// out the remainder before its browser session opens; runs never
    /// overlap against the source.
    pub run_cooldown: Duration,

    // =========================================================================
    // FRONT DOOR
    // =========================================================================
    /// Port for the control HTTP server.
    pub server_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible
    /// defaults. "Sensible" here meaning "works out of the box against a
    /// local chromedriver and a local API, but respects your wishes if
    /// you set them."
    ///
    /// Every parameter is overridable via DJE_ENGINE_-prefixed env vars,
    /// because namespacing your env vars is what separates the
    /// professionals from the amateurs.
    pub fn from_env() -> Self {
        // Try to load .env if present. Fail silently otherwise, because
        // not everyone has their life together enough to create one.
        let _ = dotenvy::dotenv();

        Config {
            gazette_base_url: env_or_default(
                "DJE_ENGINE_GAZETTE_URL",
                "https://dje.tjsp.jus.br/cdje/index.do",
            ),
            webdriver_url: env_or_default("DJE_ENGINE_WEBDRIVER_URL", "http://127.0.0.1:9515"),
            api_url: env_or_default("DJE_ENGINE_API_URL", "http://localhost:3001"),

            search_terms_csv: env_or_default("DJE_ENGINE_SEARCH_TERMS", ""),
            max_range_days: env_or_default("DJE_ENGINE_MAX_RANGE_DAYS", "30")
                .parse()
                .unwrap_or(30),
            max_days_back: env_or_default("DJE_ENGINE_MAX_DAYS_BACK", "7")
                .parse()
                .unwrap_or(7),

            max_attempts_per_date: env_or_default("DJE_ENGINE_MAX_ATTEMPTS_PER_DATE", "2")
                .parse()
                .unwrap_or(2),
            consecutive_fault_threshold: env_or_default("DJE_ENGINE_FAULT_THRESHOLD", "2")
                .parse()
                .unwrap_or(2),
            reload_delay: Duration::from_secs(
                env_or_default("DJE_ENGINE_RELOAD_DELAY_SECS", "2")
                    .parse()
                    .unwrap_or(2),
            ),
            per_date_throttle: Duration::from_millis(
                env_or_default("DJE_ENGINE_DATE_THROTTLE_MS", "1000")
                    .parse()
                    .unwrap_or(1000),
            ),
            run_cooldown: Duration::from_secs(
                env_or_default("DJE_ENGINE_RUN_COOLDOWN_SECS", "30")
                    .parse()
                    .unwrap_or(30),
            ),

            server_port: env_or_default("DJE_ENGINE_SERVER_PORT", "5002")
                .parse()
                .unwrap_or(5002),
        }
    }

    /// Validate the endpoint URLs early, so a typo'd env var fails at
    /// startup instead of three minutes into a run.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("gazette_base_url", &self.gazette_base_url),
            ("webdriver_url", &self.webdriver_url),
            ("api_url", &self.api_url),
        ] {
            Url::parse(value).with_context(|| format!("{name} is not a valid URL: {value}"))?;
        }
        Ok(())
    }

    /// The retry knobs, packaged for the orchestrator.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts_per_date: self.max_attempts_per_date,
            consecutive_fault_threshold: self.consecutive_fault_threshold,
            reload_delay: self.reload_delay,
            per_date_throttle: self.per_date_throttle,
        }
    }

    /// The default term list as owned strings, for the matcher builder.
    pub fn default_terms(&self) -> Vec<String> {
        DEFAULT_SEARCH_TERMS.iter().map(|t| t.to_string()).collect()
    }
}

/// Helper to read an environment variable with a default fallback.
/// Because unwrap_or on env::var is ugly and we have standards.
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
