use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Find the first '=' and split there
        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            // Remove surrounding quotes if present
            if (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''))
            {
                value = &value[1..value.len() - 1];
            }

            // Only set if not already set (env vars take precedence)
            if std::env::var(key).is_err() {
                // SAFETY: We're single-threaded at this point (called before any async runtime)
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface both servers bind to.
    pub host: String,
    /// WebSocket port for subscriber connections.
    pub ws_port: u16,
    /// HTTP port for the REST back-channel.
    pub http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Enable probabilistic send failures and the fault-simulation timers.
    pub failures_enabled: bool,
    /// Parsed for parity with deployed configs; the send path always
    /// flushes immediately and never consults this flag.
    pub delays_enabled: bool,
    /// Base poll interval in milliseconds.
    pub frequency_ms: u64,
    /// Upper bound for the random base lifetime of the fault timers, in
    /// seconds. Zero disables fault simulation.
    pub time_to_live_secs: u64,
    /// Probability in [0, 1] that a send attempt is deferred.
    pub error_prob: f64,
    /// Companion of `delays_enabled`; never consulted on the send path.
    pub delay_prob: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                ws_port: 8080,
                http_port: 3000,
            },
            simulation: SimulationConfig {
                failures_enabled: true,
                delays_enabled: false,
                frequency_ms: 2000,
                time_to_live_secs: 60,
                error_prob: 0.2,
                delay_prob: 0.2,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("FLEET_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("FLEET_WS_PORT")
            && let Ok(p) = port.parse()
        {
            config.server.ws_port = p;
        }
        if let Ok(port) = std::env::var("FLEET_HTTP_PORT")
            && let Ok(p) = port.parse()
        {
            config.server.http_port = p;
        }

        // Simulation configuration
        if let Ok(enabled) = std::env::var("SIM_FAILURES_ENABLED")
            && let Ok(e) = enabled.parse()
        {
            config.simulation.failures_enabled = e;
        }
        if let Ok(enabled) = std::env::var("SIM_DELAYS_ENABLED")
            && let Ok(e) = enabled.parse()
        {
            config.simulation.delays_enabled = e;
        }
        if let Ok(frequency) = std::env::var("SIM_FREQUENCY_MS")
            && let Ok(f) = frequency.parse()
        {
            config.simulation.frequency_ms = f;
        }
        if let Ok(ttl) = std::env::var("SIM_TIME_TO_LIVE_SECS")
            && let Ok(t) = ttl.parse()
        {
            config.simulation.time_to_live_secs = t;
        }
        if let Ok(prob) = std::env::var("SIM_ERROR_PROB")
            && let Ok(p) = prob.parse()
        {
            config.simulation.error_prob = p;
        }
        if let Ok(prob) = std::env::var("SIM_DELAY_PROB")
            && let Ok(p) = prob.parse()
        {
            config.simulation.delay_prob = p;
        }

        config.simulation.error_prob =
            clamp_probability("error_prob", config.simulation.error_prob);
        config.simulation.delay_prob =
            clamp_probability("delay_prob", config.simulation.delay_prob);

        config
    }
}

fn clamp_probability(name: &str, value: f64) -> f64 {
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        warn!("[Config] {name}={value} outside [0, 1], clamping");
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert!(config.simulation.frequency_ms > 0);
        assert!((0.0..=1.0).contains(&config.simulation.error_prob));
        assert!((0.0..=1.0).contains(&config.simulation.delay_prob));
        assert_ne!(config.server.ws_port, config.server.http_port);
    }

    #[test]
    fn test_from_env_overrides_and_clamps() {
        unsafe {
            std::env::set_var("SIM_FREQUENCY_MS", "250");
            std::env::set_var("SIM_ERROR_PROB", "1.5");
        }
        let config = Config::from_env();
        unsafe {
            std::env::remove_var("SIM_FREQUENCY_MS");
            std::env::remove_var("SIM_ERROR_PROB");
        }

        assert_eq!(config.simulation.frequency_ms, 250);
        assert_eq!(config.simulation.error_prob, 1.0);
    }
}
