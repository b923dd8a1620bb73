use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use super::types::*;
use crate::error_handling::types::ConfigError;

/// Complete runtime configuration, decoded from a TOML file.
///
/// ```toml
/// template = "miel"
///
/// [[services]]
/// name = "http"
/// listen = "0.0.0.0:8080"
/// director = "web"
/// mode = "http"
///
/// [directors.web]
/// kind = "forward"
/// host = "10.0.0.5:80"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Naming template applied to attacker hosts, `{host}` is optional.
    #[serde(default = "default_template")]
    pub template: String,

    /// Upper bound of concurrently relayed sessions, per service.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub channel: ChannelConfig,

    #[serde(default)]
    pub delays: DelaysConfig,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    #[serde(default)]
    pub directors: BTreeMap<String, DirectorConfig>,
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross references and addresses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::ServicesEmpty(
                "at least one [[services]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }

            service.listen.parse::<SocketAddr>().map_err(|e| {
                ConfigError::BadAddressFormatting(format!(
                    "service {}: {}: {}",
                    service.name, service.listen, e
                ))
            })?;

            if !self.directors.contains_key(&service.director) {
                return Err(ConfigError::UnknownDirector(format!(
                    "service {} references {}",
                    service.name, service.director
                )));
            }
        }

        // Names are keyed by host only, two directors with one template would collide.
        let mut templates: BTreeMap<&str, &str> = BTreeMap::new();
        for name in self.directors.keys() {
            if let Some(other) = templates.insert(self.template_for(name), name) {
                return Err(ConfigError::DuplicateTemplate(format!(
                    "directors {} and {} both name containers with {:?}, set a distinct template on one of them",
                    other,
                    name,
                    self.template_for(name)
                )));
            }
        }

        if self.web.enabled {
            self.web.listen.parse::<SocketAddr>().map_err(|e| {
                ConfigError::BadAddressFormatting(format!("web: {}: {}", self.web.listen, e))
            })?;
        }

        Ok(())
    }

    /// Naming template for a director, falling back to the global one.
    pub fn template_for(&self, director: &str) -> &str {
        self.directors
            .get(director)
            .and_then(|d| d.template.as_deref())
            .unwrap_or(&self.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
template = "honey"
max_sessions = 8

[web]
enabled = true
listen = "127.0.0.1:0"

[channel]
kind = "dummy"

[delays]
housekeeper_secs = 3

[[services]]
name = "http"
listen = "0.0.0.0:8080"
director = "web"
mode = "http"

[[services]]
name = "ssh"
listen = "0.0.0.0:2222"
director = "sandbox"

[directors.web]
kind = "forward"
host = "10.0.0.5:80"

[directors.sandbox]
kind = "sandboxed"
template = "ssh-{host}"
service_addr = "127.0.0.1:22"
freeze_after_secs = 60
"#;

    #[test]
    fn sample_config_is_decoded() {
        let config = Config::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.template, "honey");
        assert_eq!(config.max_sessions, 8);
        assert!(config.web.enabled);
        assert_eq!(config.channel.kind, ChannelKind::Dummy);
        assert_eq!(config.delays.housekeeper_secs, 3);
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].mode, ProxyMode::Http);
        assert_eq!(config.services[1].mode, ProxyMode::Raw);

        let web = &config.directors["web"];
        assert_eq!(web.kind, "forward");
        assert_eq!(web.settings.get("host").and_then(|v| v.as_str()), Some("10.0.0.5:80"));
        assert!(web.settings.get("kind").is_none());

        assert_eq!(config.template_for("web"), "honey");
        assert_eq!(config.template_for("sandbox"), "ssh-{host}");
    }

    #[test]
    fn defaults_apply_to_minimal_config() {
        let config = Config::from_toml_str(
            r#"
[[services]]
name = "raw"
listen = "127.0.0.1:9000"
director = "d"

[directors.d]
kind = "vm-stub"
"#,
        )
        .unwrap();

        assert_eq!(config.template, "miel");
        assert_eq!(config.max_sessions, 256);
        assert!(!config.web.enabled);
        assert_eq!(config.channel.kind, ChannelKind::Log);
        assert_eq!(config.delays.housekeeper_secs, 10);
    }

    #[test]
    fn empty_services_are_rejected() {
        let err = Config::from_toml_str("template = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::ServicesEmpty(_)));
    }

    #[test]
    fn unknown_director_is_rejected() {
        let err = Config::from_toml_str(
            r#"
[[services]]
name = "raw"
listen = "127.0.0.1:9000"
director = "missing"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDirector(_)));
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let err = Config::from_toml_str(
            r#"
[[services]]
name = "raw"
listen = "localhost"
director = "d"

[directors.d]
kind = "vm-stub"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadAddressFormatting(_)));
    }

    #[test]
    fn duplicate_services_are_rejected() {
        let err = Config::from_toml_str(
            r#"
[[services]]
name = "raw"
listen = "127.0.0.1:9000"
director = "d"

[[services]]
name = "raw"
listen = "127.0.0.1:9001"
director = "d"

[directors.d]
kind = "vm-stub"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateService(_)));
    }

    #[test]
    fn directors_sharing_a_template_are_rejected() {
        let err = Config::from_toml_str(
            r#"
[[services]]
name = "raw"
listen = "127.0.0.1:9000"
director = "a"

[directors.a]
kind = "vm-stub"

[directors.b]
kind = "vm-stub"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTemplate(ref e) if e.contains("\"miel\"")));

        let err = Config::from_toml_str(
            r#"
[[services]]
name = "raw"
listen = "127.0.0.1:9000"
director = "a"

[directors.a]
kind = "vm-stub"
template = "miel"

[directors.b]
kind = "vm-stub"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTemplate(_)));

        let config = Config::from_toml_str(
            r#"
[[services]]
name = "raw"
listen = "127.0.0.1:9000"
director = "a"

[directors.a]
kind = "vm-stub"

[directors.b]
kind = "vm-stub"
template = "b-{host}"
"#,
        )
        .unwrap();
        assert_ne!(config.template_for("a"), config.template_for("b"));
    }

    #[test]
    fn director_without_kind_is_a_toml_error() {
        let err = Config::from_toml_str(
            r#"
[[services]]
name = "raw"
listen = "127.0.0.1:9000"
director = "d"

[directors.d]
host = "10.0.0.1:80"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn config_is_read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.services[0].name, "http");

        let missing = Config::from_file(Path::new("/nonexistent/miel.toml"));
        assert!(matches!(missing, Err(ConfigError::IoError(_))));
    }
}
