use mri_prediction::config::ModelsConfig;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    pub dir: PathBuf,
    /// Keep successful detection uploads so the result page can link them. Nothing sweeps
    /// retained files, so only the local environment turns this on.
    #[serde(default)]
    pub retain: bool,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

fn default_max_bytes() -> usize {
    20 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("MRI")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    config.try_deserialize::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert!(matches!(
            Environment::try_from("Production".to_string()),
            Ok(Environment::Production)
        ));
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::try_from("DEBUG".to_string()), Ok(LogLevel::Debug));
        assert!(LogLevel::try_from("trace".to_string()).is_err());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = r#"
server:
  host: 127.0.0.1
  port: 8000
log_level: info
uploads:
  dir: static/uploads
models:
  detectors:
    - key: yolo
      name: YOLO Model
      model_dir: models
      onnx_file: best.onnx
      policy: best
"#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.get_address(), "127.0.0.1:8000");
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(!config.uploads.retain);
        assert_eq!(config.uploads.max_bytes, 20 * 1024 * 1024);
        assert!(config.models.classifiers.is_empty());
        let detector = &config.models.detectors[0];
        assert_eq!(detector.input_size, 640);
        assert_eq!(detector.confidence_threshold, 0.25);
        assert_eq!(detector.policy, mri_prediction::detection::DecodePolicy::Best);
        assert_eq!(detector.iou_threshold, None);
    }

    #[test]
    fn test_environment_file_overrides_retention() {
        let base = "server:\n  host: 0.0.0.0\n  port: 8000\nlog_level: info\nuploads:\n  dir: static/uploads\n  retain: false\n";
        let local = "log_level: debug\nuploads:\n  retain: true\n";

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(base, config::FileFormat::Yaml))
            .add_source(config::File::from_str(local, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.uploads.retain);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.uploads.dir, PathBuf::from("static/uploads"));
    }
}
