use config_service::config::Config as ServiceConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
    #[serde(flatten)]
    pub service: ServiceConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_service::config::KvBackendType;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            listener:
                host: 0.0.0.0
                port: 8000
            admin_listener:
                host: 127.0.0.1
                port: 8001
            kv:
                type: consul
                address: http://consul.internal:8500
                datacenter: dc1
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
                level: debug
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.service.listener.port, 8000);
        assert!(matches!(
            config.service.kv,
            KvBackendType::Consul { ref datacenter, .. } if datacenter.as_deref() == Some("dc1")
        ));
        assert_eq!(
            config.metrics,
            Some(MetricsConfig {
                statsd_host: "127.0.0.1".into(),
                statsd_port: 8125,
            })
        );
        let logging = config.logging.expect("logging config");
        assert_eq!(logging.level.as_deref(), Some("debug"));
        assert!(logging.sentry_dsn.is_some());
    }

    #[test]
    fn minimal_config() {
        let tmp = write_tmp_file("kv:\n    type: memory\n");
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.service.kv, KvBackendType::Memory);
        assert_eq!(config.service.listener.port, 8000);
        assert!(config.metrics.is_none());
        assert!(config.logging.is_none());
    }

    #[test]
    fn load_errors() {
        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/configd.yaml")),
            Err(ConfigError::LoadError(_))
        ));

        let tmp = write_tmp_file("listener: [not, a, map]\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
