// Configuration settings
//
// Dot-notation access to one configuration section. The appliance only
// reads and replaces whole sections, so a single-key write is
// read-modify-write of the section document.
//
//   GET /api/config/{section}  ->  {"config": {"{section}": {...}}}
//   PUT /api/config/{section}  <-  full section document

use std::fmt;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, trace};

use crate::client::PiholeClient;
use crate::error::Error;

// ── Values ───────────────────────────────────────────────────────────

/// A scalar configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    String(String),
    Number(Number),
}

impl SettingValue {
    /// Convert a JSON value. Objects, arrays and null are not settings.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::String(s) => Value::String(s.clone()),
            Self::Number(n) => Value::Number(n.clone()),
        }
    }

    /// Interpret user-supplied text: `true`/`false` (any case) become
    /// booleans, everything else stays a string.
    pub fn parse_lenient(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("true") {
            Self::Bool(true)
        } else if raw.eq_ignore_ascii_case("false") {
            Self::Bool(false)
        } else {
            Self::String(raw.to_owned())
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::String(s) => f.write_str(s),
            Self::Number(n) => match n.as_f64() {
                // Whole floats render without a trailing `.0`.
                Some(x) if n.is_f64() && x.fract().abs() < f64::EPSILON && x.abs() < 1e15 => {
                    write!(f, "{x:.0}")
                }
                _ => write!(f, "{n}"),
            },
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for SettingValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

/// One resolved setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSetting {
    pub key: String,
    pub value: SettingValue,
}

/// Value a setting is returned to when its declaration is removed.
///
/// The appliance has no delete for settings; `false` is the safe
/// default for the permission toggles managed here.
pub fn default_value(key: &str) -> SettingValue {
    trace!(key, "using default value");
    SettingValue::Bool(false)
}

// ── Paths ────────────────────────────────────────────────────────────

/// Top-level configuration namespaces this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Webserver,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Webserver => "webserver",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name {
            "webserver" => Ok(Self::Webserver),
            other => Err(Error::UnsupportedSection {
                section: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed dotted key: section plus the path inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingPath<'a> {
    key: &'a str,
    section: Section,
    segments: Vec<&'a str>,
}

impl<'a> SettingPath<'a> {
    /// Split `webserver.api.app_sudo` into its section and inner segments.
    pub fn parse(key: &'a str) -> Result<Self, Error> {
        let mut parts = key.split('.');
        let section = Section::from_name(parts.next().unwrap_or_default())?;
        let segments: Vec<&str> = parts.collect();

        if segments.is_empty() {
            return Err(path_error(key, "key must name a setting inside the section"));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(path_error(key, "empty path segment"));
        }

        Ok(Self {
            key,
            section,
            segments,
        })
    }

    pub fn section(&self) -> Section {
        self.section
    }

    /// Find the value at this path in a section document.
    pub fn lookup<'v>(&self, doc: &'v Map<String, Value>) -> Result<&'v Value, Error> {
        let (leaf, parents) = self.split();
        let mut current = doc;
        for (i, segment) in parents.iter().enumerate() {
            current = match current.get(*segment) {
                Some(Value::Object(next)) => next,
                Some(_) => return Err(self.not_an_object(i)),
                None => return Err(path_error(self.key, "not found")),
            };
        }
        current
            .get(leaf)
            .ok_or_else(|| path_error(self.key, "not found"))
    }

    /// Set the value at this path, creating missing intermediate objects.
    pub fn assign(&self, doc: &mut Map<String, Value>, value: Value) -> Result<(), Error> {
        let (leaf, parents) = self.split();
        let mut current = doc;
        for (i, segment) in parents.iter().enumerate() {
            let entry = current
                .entry(*segment)
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(next) => next,
                _ => return Err(self.not_an_object(i)),
            };
        }
        current.insert(leaf.to_owned(), value);
        Ok(())
    }

    fn split(&self) -> (&'a str, &[&'a str]) {
        match self.segments.split_last() {
            Some((leaf, parents)) => (*leaf, parents),
            None => ("", &[]),
        }
    }

    fn not_an_object(&self, depth: usize) -> Error {
        let prefix = self.segments[..=depth].join(".");
        path_error(
            self.key,
            &format!("'{}.{prefix}' is not a nested object", self.section),
        )
    }
}

fn path_error(key: &str, reason: &str) -> Error {
    Error::ConfigPath {
        key: key.to_owned(),
        reason: reason.to_owned(),
    }
}

// ── Client ───────────────────────────────────────────────────────────

impl PiholeClient {
    /// Fetch a whole configuration section.
    ///
    /// `GET /api/config/{section}`
    pub async fn get_section(&self, section: Section) -> Result<Map<String, Value>, Error> {
        let url = self.api_url(&format!("config/{section}"))?;
        debug!(%section, "fetching config section");

        let resp = self.execute(Method::GET, url, None).await?;
        let mut body =
            PiholeClient::read_json(resp, || format!("read config section '{section}'")).await?;

        match body
            .pointer_mut(&format!("/config/{section}"))
            .map(Value::take)
        {
            Some(Value::Object(doc)) => Ok(doc),
            _ => Err(Error::Deserialization {
                message: format!("response has no '{section}' section object"),
                body: body.to_string(),
            }),
        }
    }

    /// Replace a whole configuration section.
    ///
    /// `PUT /api/config/{section}`
    pub async fn put_section(
        &self,
        section: Section,
        doc: Map<String, Value>,
    ) -> Result<(), Error> {
        self.throttle().await?;
        self.write_section(section, doc).await
    }

    async fn write_section(&self, section: Section, doc: Map<String, Value>) -> Result<(), Error> {
        let url = self.api_url(&format!("config/{section}"))?;
        debug!(%section, "writing config section");

        let body = Value::Object(doc);
        let resp = self.execute(Method::PUT, url, Some(&body)).await?;
        PiholeClient::expect_success(resp, || format!("write config section '{section}'")).await
    }

    /// Read one setting by dotted key, e.g. `webserver.api.app_sudo`.
    pub async fn get_config(&self, key: &str) -> Result<ConfigSetting, Error> {
        let path = SettingPath::parse(key)?;
        let doc = self.get_section(path.section()).await?;
        let raw = path.lookup(&doc)?;

        let value = SettingValue::from_json(raw)
            .ok_or_else(|| path_error(key, "value is not a scalar setting"))?;
        Ok(ConfigSetting {
            key: key.to_owned(),
            value,
        })
    }

    /// Write one setting by dotted key, preserving its siblings.
    pub async fn set_config(
        &self,
        key: &str,
        value: impl Into<SettingValue>,
    ) -> Result<(), Error> {
        let path = SettingPath::parse(key)?;
        let value = value.into();

        self.throttle().await?;
        let mut doc = self.get_section(path.section()).await?;
        path.assign(&mut doc, value.to_json())?;
        debug!(key, %value, "setting config value");

        self.write_section(path.section(), doc).await
    }

    /// Return a setting to its [`default_value`].
    pub async fn reset_config(&self, key: &str) -> Result<(), Error> {
        self.set_config(key, default_value(key)).await
    }
}
