//! # Provider Configuration
//!
//! The startup document that declares which sessions a provider creates
//! eagerly:
//!
//! ```json
//! { "sessions": {
//!     "main": { "language": "tally", "config": {},
//!               "preamble": "def add(a, b) = a + b",
//!               "preamble_file": "/path/to/script",
//!               "preamble_argv": [1, "two"] } } }
//! ```
//!
//! Sessions keep the order in which the document lists them.

use serde::Deserialize;
use serde::Serialize;

use stanzapack::Value;

use crate::error::Error;
use crate::error::Result;

/// One entry under `sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub language: String,
    /// Handed to the backend factory as-is.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
    /// Code run right after the session is created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<String>,
    /// A script loaded right after the session is created, before `preamble`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble_file: Option<String>,
    /// Arguments passed to both preambles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preamble_argv: Vec<serde_json::Value>,
}

impl SessionConfig {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            config: serde_json::Value::Null,
            preamble: None,
            preamble_file: None,
            preamble_argv: Vec::new(),
        }
    }

    pub fn with_preamble(mut self, code: impl Into<String>) -> Self {
        self.preamble = Some(code.into());
        self
    }

    pub fn with_preamble_file(mut self, path: impl Into<String>) -> Self {
        self.preamble_file = Some(path.into());
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// The backend configuration as a value tree.
    pub fn backend_config(&self) -> Value {
        Value::from(self.config.clone())
    }

    pub fn preamble_args(&self) -> Vec<Value> {
        self.preamble_argv.iter().cloned().map(Value::from).collect()
    }
}

/// A validated provider configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    pub sessions: Vec<(String, SessionConfig)>,
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session declaration; a later declaration under the same name wins.
    pub fn with_session(mut self, name: impl Into<String>, session: SessionConfig) -> Self {
        let name = name.into();
        match self.sessions.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = session,
            None => self.sessions.push((name, session)),
        }
        self
    }

    /// Parses a configuration document. Empty text is an empty configuration.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Self::from_json(json)
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut root) = json else {
            return Err(Error::InvalidConfig("configuration must be an object".into()));
        };

        let sessions = match root.remove("sessions") {
            None | Some(serde_json::Value::Null) => return Ok(Self::default()),
            Some(serde_json::Value::Object(sessions)) => sessions,
            Some(_) => return Err(Error::InvalidConfig("\"sessions\" must be an object".into())),
        };

        let mut config = Self::default();
        for (name, entry) in sessions {
            if !entry.is_object() {
                return Err(Error::InvalidConfig(format!("session \"{}\" must be an object", name)));
            }
            let session: SessionConfig = serde_json::from_value(entry)
                .map_err(|e| Error::InvalidConfig(format!("session \"{}\": {}", name, e)))?;
            config.sessions.push((name, session));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let sessions: serde_json::Map<String, serde_json::Value> = self
            .sessions
            .iter()
            .map(|(name, session)| {
                let entry = serde_json::to_value(session).unwrap_or(serde_json::Value::Null);
                (name.clone(), entry)
            })
            .collect();
        serde_json::json!({ "sessions": sessions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_document_order() {
        let config = ProviderConfig::parse(
            r#"{"sessions": {"zeta": {"language": "tally"}, "alpha": {"language": "tally", "preamble": "let x = 1"}}}"#,
        )
        .unwrap();
        let names: Vec<&str> = config.sessions.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(config.sessions[1].1.preamble.as_deref(), Some("let x = 1"));
    }

    #[test]
    fn empty_documents() {
        assert_eq!(ProviderConfig::parse("").unwrap(), ProviderConfig::default());
        assert_eq!(ProviderConfig::parse("{}").unwrap(), ProviderConfig::default());
    }

    #[test]
    fn rejects_malformed_documents() {
        let cases = [
            "[1, 2]",
            r#"{"sessions": []}"#,
            r#"{"sessions": {"a": 3}}"#,
            r#"{"sessions": {"a": {}}}"#,
            r#"{"sessions": {"a": {"language": 1}}}"#,
            r#"{"sessions": {"a": {"language": "tally", "preamble": 5}}}"#,
            r#"{"sessions": {"a": {"language": "tally", "preamble_file": true}}}"#,
            r#"{"sessions": {"a": {"language": "tally", "preamble_argv": "x"}}}"#,
            "{ not json",
        ];
        for case in cases {
            assert!(matches!(ProviderConfig::parse(case), Err(Error::InvalidConfig(_))), "accepted {}", case);
        }
    }

    #[test]
    fn preamble_args_become_values() {
        let config = ProviderConfig::parse(
            r#"{"sessions": {"a": {"language": "tally", "preamble_argv": [3, "x"]}}}"#,
        )
        .unwrap();
        assert_eq!(config.sessions[0].1.preamble_args(), vec![Value::UInt(3), Value::from("x")]);
    }

    #[test]
    fn builder_round_trips_through_json() {
        let config = ProviderConfig::new()
            .with_session("main", SessionConfig::new("tally").with_preamble("def one() = 1"))
            .with_session("aux", SessionConfig::new("tally").with_config(serde_json::json!({"seed": 4})));
        let reparsed = ProviderConfig::from_json(config.to_json()).unwrap();
        assert_eq!(reparsed, config);
    }
}
