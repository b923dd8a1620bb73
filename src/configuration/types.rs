use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub(crate) fn default_template() -> String {
    "miel".to_string()
}

pub(crate) fn default_max_sessions() -> usize {
    256
}

fn default_web_listen() -> String {
    "127.0.0.1:8089".to_string()
}

fn default_housekeeper_secs() -> u64 {
    10
}

/// How a service relays traffic to its containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    Raw,
    Http,
}

/// One listening socket and the director that serves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub listen: String,
    pub director: String,
    #[serde(default)]
    pub mode: ProxyMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_web_listen")]
    pub listen: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_web_listen(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Log,
    Dummy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelaysConfig {
    /// Period of the idle housekeeper, `0` disables it.
    #[serde(default = "default_housekeeper_secs")]
    pub housekeeper_secs: u64,
}

impl Default for DelaysConfig {
    fn default() -> Self {
        Self {
            housekeeper_secs: default_housekeeper_secs(),
        }
    }
}

/// A `[directors.NAME]` table.
///
/// `kind` selects the constructor and `template` optionally overrides the
/// global naming template. Every other key is kept as-is and decoded by the
/// backend itself.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectorConfig {
    pub kind: String,
    pub template: Option<String>,
    pub settings: toml::Table,
}

impl<'de> Deserialize<'de> for DirectorConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut settings = toml::Table::deserialize(deserializer)?;

        let kind = match settings.remove("kind") {
            Some(toml::Value::String(kind)) => kind,
            Some(other) => {
                return Err(de::Error::custom(format!(
                    "director kind must be a string, found {}",
                    other.type_str()
                )))
            }
            None => return Err(de::Error::missing_field("kind")),
        };

        let template = match settings.remove("template") {
            Some(toml::Value::String(template)) => Some(template),
            Some(other) => {
                return Err(de::Error::custom(format!(
                    "director template must be a string, found {}",
                    other.type_str()
                )))
            }
            None => None,
        };

        Ok(DirectorConfig {
            kind,
            template,
            settings,
        })
    }
}
