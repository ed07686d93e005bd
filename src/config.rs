use std::time::Duration;

const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 200 * 1024;
const DEFAULT_TX_TIMEOUT_MS: u64 = 30_000;
/// Keeps `Instant` arithmetic and SQLite's busy timeout in range.
const MAX_TX_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Ceilings and deadlines applied to every batch submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    pub max_batch_size: usize,
    pub max_payload_bytes: usize,
    pub tx_timeout: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            tx_timeout: Duration::from_millis(DEFAULT_TX_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub limits: PipelineLimits,
    /// Workspace to open before the first request arrives.
    pub workspace: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = PipelineLimits::default();
        let limits = PipelineLimits {
            max_batch_size: parse_or(
                &lookup,
                "HABITD_MAX_BATCH_SIZE",
                defaults.max_batch_size,
            ),
            max_payload_bytes: parse_or(
                &lookup,
                "HABITD_MAX_PAYLOAD_BYTES",
                defaults.max_payload_bytes,
            ),
            tx_timeout: Duration::from_millis(tx_timeout_ms(&lookup)),
        };
        let workspace = lookup("HABITD_WORKSPACE").filter(|v| !v.trim().is_empty());
        Self { limits, workspace }
    }
}

fn tx_timeout_ms(lookup: &impl Fn(&str) -> Option<String>) -> u64 {
    let ms = parse_or(lookup, "HABITD_TX_TIMEOUT_MS", DEFAULT_TX_TIMEOUT_MS);
    if ms > MAX_TX_TIMEOUT_MS {
        tracing::warn!(
            value = ms,
            max = MAX_TX_TIMEOUT_MS,
            "HABITD_TX_TIMEOUT_MS too large; clamping"
        );
        return MAX_TX_TIMEOUT_MS;
    }
    ms
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Debug,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!(key, value = %raw, ?default, "unparseable setting; using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_import_ceilings() {
        let cfg = config_with(&[]);
        assert_eq!(cfg.limits.max_batch_size, 1000);
        assert_eq!(cfg.limits.max_payload_bytes, 204_800);
        assert_eq!(cfg.limits.tx_timeout, Duration::from_secs(30));
        assert!(cfg.workspace.is_none());
    }

    #[test]
    fn env_overrides_and_bad_values_fall_back() {
        let cfg = config_with(&[
            ("HABITD_TX_TIMEOUT_MS", "0"),
            ("HABITD_MAX_BATCH_SIZE", "many"),
            ("HABITD_WORKSPACE", "  "),
        ]);
        assert_eq!(cfg.limits.tx_timeout, Duration::ZERO);
        assert_eq!(cfg.limits.max_batch_size, 1000);
        assert!(cfg.workspace.is_none());
    }

    #[test]
    fn oversized_timeout_is_clamped() {
        let cfg = config_with(&[("HABITD_TX_TIMEOUT_MS", "18446744073709551615")]);
        assert_eq!(cfg.limits.tx_timeout, Duration::from_secs(600));
        let cfg = config_with(&[("HABITD_TX_TIMEOUT_MS", "3000000000")]);
        assert_eq!(cfg.limits.tx_timeout, Duration::from_secs(600));
    }
}
