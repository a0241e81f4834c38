// Shared types for the docker-console crates

use std::collections::BTreeMap;

use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "testing")]
pub mod testing;

/// Name used for the cache directory and in user-facing output.
pub const APPLICATION_NAME: &str = "docker-console";

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Daemon Error: {0}")]
    Daemon(String),

    #[error("Index Error: {0}")]
    Index(String),

    #[error("Template Error: {0}")]
    Template(String),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Snapshot of a container as reported by the daemon.
///
/// Never cached by the console itself; the only long-lived copy is the one
/// stored inside the search index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub image_id: String,
    pub command: String,
    /// Creation time, seconds since the Unix epoch.
    pub created: i64,
    pub state: String,
    pub status: String,
    pub labels: BTreeMap<String, String>,
}

impl ContainerRecord {
    /// First name with its leading character removed.
    ///
    /// The daemon reports names as `/name`; the strip is applied whether or
    /// not the separator is present. Containers without names display as "".
    pub fn display_name(&self) -> &str {
        self.names
            .first()
            .map(|name| strip_first_char(name))
            .unwrap_or_default()
    }

    /// Colour hint for the container list page.
    pub fn status_color(&self) -> &'static str {
        match self.state.as_str() {
            "running" => "green",
            "paused" | "restarting" => "orange",
            "exited" | "dead" => "red",
            _ => "grey",
        }
    }
}

pub fn strip_first_char(value: &str) -> &str {
    let mut chars = value.chars();
    chars.next();
    chars.as_str()
}

/// Read access to the container engine.
#[async_trait]
pub trait ContainerSource: Send + Sync {
    /// List containers in every state. With `ids`, only containers whose
    /// identifier is one of them are returned; unknown identifiers are
    /// silently absent from the result.
    async fn list_containers(&self, ids: Option<&[String]>) -> Result<Vec<ContainerRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(names: &[&str]) -> ContainerRecord {
        ContainerRecord {
            id: "abc123".to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_display_name_strips_separator() {
        assert_eq!(named(&["/my-app"]).display_name(), "my-app");
    }

    #[test]
    fn test_display_name_strips_unconditionally() {
        assert_eq!(named(&["my-app"]).display_name(), "y-app");
        assert_eq!(named(&["x"]).display_name(), "");
    }

    #[test]
    fn test_display_name_uses_first_name_only() {
        assert_eq!(named(&["/web", "/proxy/web"]).display_name(), "web");
    }

    #[test]
    fn test_display_name_without_names() {
        assert_eq!(named(&[]).display_name(), "");
        assert_eq!(named(&[""]).display_name(), "");
    }

    #[test]
    fn test_strip_first_char_is_char_aware() {
        assert_eq!(strip_first_char("éclair"), "clair");
    }

    #[test]
    fn test_status_color() {
        let mut record = ContainerRecord::default();
        for (state, color) in [
            ("running", "green"),
            ("paused", "orange"),
            ("restarting", "orange"),
            ("exited", "red"),
            ("dead", "red"),
            ("created", "grey"),
        ] {
            record.state = state.to_string();
            assert_eq!(record.status_color(), color, "state {state}");
        }
    }

    #[test]
    fn test_record_serializes_all_fields() {
        let record = ContainerRecord {
            id: "abc".into(),
            names: vec!["/db".into()],
            image: "postgres:16".into(),
            labels: BTreeMap::from([("tier".to_string(), "data".to_string())]),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["image"], "postgres:16");
        assert_eq!(json["labels"]["tier"], "data");

        let back: ContainerRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
