use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("KV timeout cannot be 0")]
    InvalidTimeout,

    #[error("Unsupported KV address scheme: {0}")]
    UnsupportedScheme(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum KvBackendType {
    Consul {
        #[serde(default = "default_consul_address")]
        address: Url,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        datacenter: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Memory,
}

fn default_consul_address() -> Url {
    Url::parse("http://127.0.0.1:8500").expect("static url")
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for KvBackendType {
    fn default() -> Self {
        KvBackendType::Consul {
            address: default_consul_address(),
            token: None,
            datacenter: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }

    fn default_api() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }

    fn default_admin() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8001,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Public API listener
    #[serde(default = "Listener::default_api")]
    pub listener: Listener,
    /// Health and readiness probes
    #[serde(default = "Listener::default_admin")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub kv: KvBackendType,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default_api(),
            admin_listener: Listener::default_admin(),
            kv: KvBackendType::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if let KvBackendType::Consul {
            address,
            timeout_secs,
            ..
        } = &self.kv
        {
            if !matches!(address.scheme(), "http" | "https") {
                return Err(ValidationError::UnsupportedScheme(
                    address.scheme().to_string(),
                ));
            }
            if *timeout_secs == 0 {
                return Err(ValidationError::InvalidTimeout);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listener.port, 8000);
        assert_eq!(config.admin_listener.host, "127.0.0.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_consul() {
        let yaml = r#"
listener:
    host: "127.0.0.1"
    port: 9000
kv:
    type: consul
    address: "http://consul.internal:8500"
    token: abc
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listener.port, 9000);
        assert_eq!(
            config.kv,
            KvBackendType::Consul {
                address: Url::parse("http://consul.internal:8500").unwrap(),
                token: Some("abc".into()),
                datacenter: None,
                timeout_secs: 5,
            }
        );
    }

    #[test]
    fn test_parse_memory() {
        let config: Config = serde_yaml::from_str("kv: {type: memory}").unwrap();
        assert_eq!(config.kv, KvBackendType::Memory);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.admin_listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = Config::default();
        config.kv = KvBackendType::Consul {
            address: Url::parse("ftp://consul").unwrap(),
            token: None,
            datacenter: None,
            timeout_secs: 5,
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::UnsupportedScheme("ftp".into()))
        );

        let mut config = Config::default();
        config.kv = KvBackendType::Consul {
            address: default_consul_address(),
            token: None,
            datacenter: None,
            timeout_secs: 0,
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidTimeout));
    }

    #[test]
    fn test_deserialization_errors() {
        // Unknown backend
        assert!(serde_yaml::from_str::<Config>("kv: {type: etcd}").is_err());
        // Invalid URL
        assert!(serde_yaml::from_str::<Config>("kv: {type: consul, address: not-a-url}").is_err());
        // Invalid port type
        assert!(
            serde_yaml::from_str::<Config>(r#"listener: {host: "0.0.0.0", port: "x"}"#).is_err()
        );
    }
}
