use std::collections::BTreeMap;
use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use uuid::Uuid;

pub const FIELD_DATE: &str = "date";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_SENSOR: &str = "sensor";
pub const FIELD_CATEGORY: &str = "category";
pub const FIELD_CONTAINER: &str = "container-name";
pub const FIELD_SESSION: &str = "session-id";
pub const FIELD_SERVICE: &str = "service";
pub const FIELD_SOURCE: &str = "source-addr";
pub const FIELD_DESTINATION: &str = "destination-addr";
pub const FIELD_ERROR: &str = "error";

pub const SENSOR_CONNECTION: &str = "connection";
pub const SENSOR_SESSION: &str = "session";
pub const SENSOR_CONTAINER: &str = "container";
pub const SENSOR_DATA: &str = "data";

pub const CONNECTION_OPENED: &str = "connection:opened";
pub const CONNECTION_CLOSED: &str = "connection:closed";
pub const SESSION_OPENED: &str = "session:opened";
pub const SESSION_CLOSED: &str = "session:closed";
pub const CONTAINER_STARTED: &str = "container:started";
pub const CONTAINER_FROZEN: &str = "container:frozen";
pub const CONTAINER_UNFROZEN: &str = "container:unfrozen";
pub const CONTAINER_STOPPED: &str = "container:stopped";
pub const CONTAINER_ERROR: &str = "container:error";
pub const DATA_REQUEST: &str = "data:request";

/// A typed event field.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Text(String),
    Number(i64),
    Addr(SocketAddr),
    Time(DateTime<Utc>),
    Bytes(Vec<u8>),
    Headers(BTreeMap<String, Vec<String>>),
}

impl EventValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            EventValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            EventValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl Serialize for EventValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EventValue::Text(s) => serializer.serialize_str(s),
            EventValue::Number(n) => serializer.serialize_i64(*n),
            EventValue::Addr(a) => serializer.collect_str(a),
            EventValue::Time(t) => serializer.serialize_str(&t.to_rfc3339()),
            EventValue::Bytes(b) => match std::str::from_utf8(b) {
                Ok(text) => serializer.serialize_str(text),
                // Binary payloads are kept intact as {"encoding": "base64", "data": ...}.
                Err(_) => {
                    let mut map = serializer.serialize_map(Some(2))?;
                    map.serialize_entry("encoding", "base64")?;
                    map.serialize_entry("data", &BASE64.encode(b))?;
                    map.end()
                }
            },
            EventValue::Headers(h) => {
                let mut map = serializer.serialize_map(Some(h.len()))?;
                for (k, v) in h {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self {
        EventValue::Text(v.to_string())
    }
}

impl From<String> for EventValue {
    fn from(v: String) -> Self {
        EventValue::Text(v)
    }
}

impl From<i64> for EventValue {
    fn from(v: i64) -> Self {
        EventValue::Number(v)
    }
}

impl From<u64> for EventValue {
    fn from(v: u64) -> Self {
        EventValue::Number(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<SocketAddr> for EventValue {
    fn from(v: SocketAddr) -> Self {
        EventValue::Addr(v)
    }
}

impl From<DateTime<Utc>> for EventValue {
    fn from(v: DateTime<Utc>) -> Self {
        EventValue::Time(v)
    }
}

impl From<Vec<u8>> for EventValue {
    fn from(v: Vec<u8>) -> Self {
        EventValue::Bytes(v)
    }
}

impl From<Uuid> for EventValue {
    fn from(v: Uuid) -> Self {
        EventValue::Text(v.to_string())
    }
}

/// Immutable field map describing one completed unit of activity.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct Event {
    fields: BTreeMap<String, EventValue>,
}

impl Event {
    pub fn builder(sensor: &str, kind: &str) -> EventBuilder {
        EventBuilder::new()
            .with(FIELD_DATE, Utc::now())
            .with(FIELD_SENSOR, sensor)
            .with(FIELD_TYPE, kind)
    }

    pub fn get(&self, key: &str) -> Option<&EventValue> {
        self.fields.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(EventValue::as_text)
    }

    pub fn kind(&self) -> Option<&str> {
        self.text(FIELD_TYPE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn connection_opened(service: &str, session_id: Uuid, source: &str, destination: Option<SocketAddr>) -> Event {
        let builder = Event::builder(SENSOR_CONNECTION, CONNECTION_OPENED)
            .with(FIELD_SERVICE, service)
            .with(FIELD_SESSION, session_id)
            .with(FIELD_SOURCE, source);
        match destination {
            Some(addr) => builder.with(FIELD_DESTINATION, addr).build(),
            None => builder.build(),
        }
    }

    pub fn connection_closed(service: &str, session_id: Uuid, source: &str) -> Event {
        Event::builder(SENSOR_CONNECTION, CONNECTION_CLOSED)
            .with(FIELD_SERVICE, service)
            .with(FIELD_SESSION, session_id)
            .with(FIELD_SOURCE, source)
            .build()
    }

    pub fn session_opened(container: &str, session_id: Uuid, source: &str) -> Event {
        Event::builder(SENSOR_SESSION, SESSION_OPENED)
            .with(FIELD_CONTAINER, container)
            .with(FIELD_SESSION, session_id)
            .with(FIELD_SOURCE, source)
            .build()
    }

    /// Disconnect record, carrying byte counts per direction.
    pub fn session_closed(
        container: &str,
        session_id: Uuid,
        bytes_in: u64,
        bytes_out: u64,
        error: Option<&str>,
    ) -> Event {
        let builder = Event::builder(SENSOR_SESSION, SESSION_CLOSED)
            .with(FIELD_CONTAINER, container)
            .with(FIELD_SESSION, session_id)
            .with("bytes-in", bytes_in)
            .with("bytes-out", bytes_out);
        match error {
            Some(e) => builder.with(FIELD_ERROR, e).build(),
            None => builder.build(),
        }
    }

    pub fn container(kind: &str, container: &str) -> EventBuilder {
        Event::builder(SENSOR_CONTAINER, kind).with(FIELD_CONTAINER, container)
    }
}

/// Accumulates fields until [`EventBuilder::build`] freezes them.
#[derive(Debug, Default, Clone)]
pub struct EventBuilder {
    fields: BTreeMap<String, EventValue>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<EventValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_opt(self, key: impl Into<String>, value: Option<impl Into<EventValue>>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn build(self) -> Event {
        Event { fields: self.fields }
    }
}
