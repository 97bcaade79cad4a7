// Jackson Coxson

use std::time::Duration;

use json::JsonValue;
use tokio::sync::Semaphore;

use crate::error::ConfigError;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub listen: Vec<String>,
    pub remote: String,
    pub dial_timeout: Duration,
    /// Caps concurrent sessions when set. Unbounded otherwise.
    pub max_sessions: Option<usize>,
}

impl ProxyConfig {
    pub fn new(listen: Vec<String>, remote: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            listen,
            remote: remote.into(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            max_sessions: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_max_sessions(mut self, max: usize) -> Result<Self, ConfigError> {
        if max == 0 || max > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "max_sessions must be between 1 and {}",
                Semaphore::MAX_PERMITS
            )));
        }
        self.max_sessions = Some(max);
        Ok(self)
    }

    pub fn load() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        if args.len() == 1 && args[0].ends_with(".json") {
            let j = std::fs::read_to_string(&args[0]).map_err(|source| ConfigError::Read {
                path: args[0].clone(),
                source,
            })?;
            Self::load_from_json(&j)
        } else {
            Self::load_from_args(&args)
        }
    }

    /// `<local> [<local> ...] <remote>`
    pub fn load_from_args(args: &[String]) -> Result<Self, ConfigError> {
        match args.split_last() {
            Some((remote, listen)) if !listen.is_empty() => {
                Self::new(listen.to_vec(), remote.clone())
            }
            _ => Err(ConfigError::Usage),
        }
    }

    pub fn load_from_json(config_string: &str) -> Result<Self, ConfigError> {
        let config = json::parse(config_string)?;
        if !config.is_object() {
            return Err(ConfigError::Invalid("expected an object".to_string()));
        }

        let listen = match &config["listen"] {
            JsonValue::Array(entries) => entries
                .iter()
                .map(|e| {
                    e.as_str().map(str::to_string).ok_or_else(|| {
                        ConfigError::Invalid(format!("listen entry is not a string: {}", e.dump()))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            JsonValue::Null => return Err(ConfigError::Usage),
            other => {
                return Err(ConfigError::Invalid(format!(
                    "listen must be a list, got {}",
                    other.dump()
                )))
            }
        };
        let remote = match &config["remote"] {
            JsonValue::Null => return Err(ConfigError::Usage),
            r => r
                .as_str()
                .ok_or_else(|| ConfigError::Invalid(format!("remote is not a string: {}", r.dump())))?,
        };

        let mut res = Self::new(listen, remote)?;
        if let Some(ms) = optional_number(&config, "dial_timeout_ms")? {
            if ms == 0 {
                return Err(ConfigError::Invalid("dial_timeout_ms must be positive".to_string()));
            }
            res = res.with_dial_timeout(Duration::from_millis(ms));
        }
        if let Some(max) = optional_number(&config, "max_sessions")? {
            let max = usize::try_from(max).unwrap_or(usize::MAX);
            res = res.with_max_sessions(max)?;
        }
        Ok(res)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.is_empty() {
            return Err(ConfigError::Usage);
        }
        for addr in self.listen.iter().chain(std::iter::once(&self.remote)) {
            check_address(addr)?;
        }
        Ok(())
    }
}

/// Accepts `host:port` and `[v6]:port`. Names are resolved later by the runtime.
fn check_address(addr: &str) -> Result<(), ConfigError> {
    let bad = || ConfigError::Address(addr.to_string());
    let (host, port) = addr.rsplit_once(':').ok_or_else(bad)?;
    port.parse::<u16>().map_err(|_| bad())?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').ok_or_else(bad)?,
        None if host.contains(':') => return Err(bad()),
        None => host,
    };
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(bad());
    }
    Ok(())
}

fn optional_number(config: &JsonValue, key: &str) -> Result<Option<u64>, ConfigError> {
    let value = &config[key];
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_u64()
        .map(Some)
        .ok_or_else(|| ConfigError::Invalid(format!("{key} must be a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn last_argument_is_the_remote() {
        let c = ProxyConfig::load_from_args(&args(&[
            "127.0.0.1:9001",
            "127.0.0.1:9002",
            "10.0.0.1:9100",
        ]))
        .unwrap();
        assert_eq!(c.listen, args(&["127.0.0.1:9001", "127.0.0.1:9002"]));
        assert_eq!(c.remote, "10.0.0.1:9100");
        assert_eq!(c.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        assert_eq!(c.max_sessions, None);
    }

    #[test]
    fn too_few_arguments() {
        assert!(matches!(
            ProxyConfig::load_from_args(&[]),
            Err(ConfigError::Usage)
        ));
        assert!(matches!(
            ProxyConfig::load_from_args(&args(&["127.0.0.1:9001"])),
            Err(ConfigError::Usage)
        ));
    }

    #[test]
    fn addresses_need_host_and_port() {
        for bad in ["9001", "127.0.0.1", ":9001", "localhost:http", "::1:80", "[::1:80", "a b:1"] {
            let res = ProxyConfig::load_from_args(&args(&[bad, "127.0.0.1:9100"]));
            assert!(matches!(res, Err(ConfigError::Address(_))), "{bad} accepted");
        }
        for good in ["localhost:9001", "[::1]:9001", "0.0.0.0:0"] {
            ProxyConfig::load_from_args(&args(&[good, "example.com:443"])).unwrap();
        }
    }

    #[test]
    fn json_config() {
        let c = ProxyConfig::load_from_json(
            r#"{
                "listen": ["127.0.0.1:9001", "127.0.0.1:9002"],
                "remote": "127.0.0.1:9100",
                "dial_timeout_ms": 2500,
                "max_sessions": 64
            }"#,
        )
        .unwrap();
        assert_eq!(c.listen.len(), 2);
        assert_eq!(c.remote, "127.0.0.1:9100");
        assert_eq!(c.dial_timeout, Duration::from_millis(2500));
        assert_eq!(c.max_sessions, Some(64));
    }

    #[test]
    fn session_cap_must_fit_a_semaphore() {
        let base = ProxyConfig::new(args(&["a:1"]), "b:2").unwrap();
        assert!(matches!(
            base.clone().with_max_sessions(0),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            base.clone().with_max_sessions(Semaphore::MAX_PERMITS + 1),
            Err(ConfigError::Invalid(_))
        ));
        let top = base.with_max_sessions(Semaphore::MAX_PERMITS).unwrap();
        assert_eq!(top.max_sessions, Some(Semaphore::MAX_PERMITS));

        let res = ProxyConfig::load_from_json(
            r#"{"listen": ["a:1"], "remote": "b:2", "max_sessions": 4611686018427387904}"#,
        );
        assert!(matches!(res, Err(ConfigError::Invalid(_))), "{res:?}");
    }

    #[test]
    fn json_defaults_and_errors() {
        let c = ProxyConfig::load_from_json(r#"{"listen": ["a:1"], "remote": "b:2"}"#).unwrap();
        assert_eq!(c.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        assert_eq!(c.max_sessions, None);

        assert!(matches!(
            ProxyConfig::load_from_json(r#"{"remote": "b:2"}"#),
            Err(ConfigError::Usage)
        ));
        assert!(matches!(
            ProxyConfig::load_from_json(r#"{"listen": [], "remote": "b:2"}"#),
            Err(ConfigError::Usage)
        ));
        assert!(matches!(
            ProxyConfig::load_from_json(r#"{"listen": [1], "remote": "b:2"}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ProxyConfig::load_from_json(r#"{"listen": ["a:1"], "remote": "b:2", "dial_timeout_ms": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ProxyConfig::load_from_json("[1, 2"),
            Err(ConfigError::Json(_))
        ));
    }
}
