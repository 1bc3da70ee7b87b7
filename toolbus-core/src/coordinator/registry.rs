//! Registry of announced tools
//!
//! Entries only ever come from announcements. Each announcement fully replaces
//! the previous entry for that name and resets its heartbeat; an entry whose
//! heartbeat is older than the TTL is stale.

use crate::clock::elapsed;
use crate::protocol::ToolDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A tool as known to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    /// Receipt time of the latest announcement
    pub last_announce: DateTime<Utc>,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    /// Silent for strictly longer than `ttl`
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        elapsed(self.last_announce, now) > ttl
    }
}

/// What an announcement did to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// First announcement for this name
    New,
    /// Known tool announced a different version
    VersionChanged { previous: String },
    /// Heartbeat for a known tool
    Refreshed,
}

/// Tools keyed by name
///
/// Not synchronized; the coordinator guards it with its own lock.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `descriptor.name` (last write wins)
    pub fn upsert(&mut self, descriptor: ToolDescriptor, at: DateTime<Utc>) -> Upsert {
        let name = descriptor.name.clone();
        let version = descriptor.version.clone();
        let entry = RegisteredTool {
            descriptor,
            last_announce: at,
        };
        match self.tools.insert(name, entry) {
            None => Upsert::New,
            Some(previous) if previous.descriptor.version != version => Upsert::VersionChanged {
                previous: previous.descriptor.version,
            },
            Some(_) => Upsert::Refreshed,
        }
    }

    /// Remove entries silent for longer than `ttl`, returning their names
    pub fn prune(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<String> {
        let mut expired: Vec<String> = self
            .tools
            .values()
            .filter(|tool| tool.is_expired(now, ttl))
            .map(|tool| tool.name().to_string())
            .collect();
        expired.sort();
        for name in &expired {
            self.tools.remove(name);
        }
        expired
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<RegisteredTool> {
        self.tools.remove(name)
    }

    /// All entries, sorted by name
    pub fn list(&self) -> Vec<&RegisteredTool> {
        let mut tools: Vec<&RegisteredTool> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// Entries not yet stale at `now`, sorted by name
    pub fn live(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<&RegisteredTool> {
        self.list()
            .into_iter()
            .filter(|tool| !tool.is_expired(now, ttl))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParameterSchema;

    fn descriptor(name: &str, version: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, "test tool").with_version(version)
    }

    #[test]
    fn test_upsert_outcomes() {
        let now = Utc::now();
        let mut registry = ToolRegistry::new();
        assert_eq!(registry.upsert(descriptor("search", "1"), now), Upsert::New);
        assert_eq!(registry.upsert(descriptor("search", "1"), now), Upsert::Refreshed);
        assert_eq!(
            registry.upsert(descriptor("search", "2"), now),
            Upsert::VersionChanged {
                previous: "1".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("search").unwrap().version(), "2");
    }

    #[test]
    fn test_announcement_replaces_schemas() {
        let now = Utc::now();
        let mut registry = ToolRegistry::new();
        registry.upsert(
            descriptor("search", "1").with_parameter(ParameterSchema::string("query")),
            now,
        );
        registry.upsert(
            descriptor("search", "1").with_parameter(ParameterSchema::string("q")),
            now,
        );
        let params = &registry.get("search").unwrap().descriptor.parameters;
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "q");
    }

    #[test]
    fn test_ttl_boundary() {
        let start = Utc::now();
        let ttl = Duration::from_secs(61);
        let mut registry = ToolRegistry::new();
        registry.upsert(descriptor("search", "1"), start);

        let at_ttl = start + chrono::Duration::seconds(61);
        assert_eq!(registry.live(at_ttl, ttl).len(), 1);
        assert!(registry.prune(at_ttl, ttl).is_empty());

        let past_ttl = at_ttl + chrono::Duration::milliseconds(1);
        assert!(registry.live(past_ttl, ttl).is_empty());
        assert_eq!(registry.prune(past_ttl, ttl), vec!["search".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_refresh_extends_lifetime() {
        let start = Utc::now();
        let ttl = Duration::from_secs(61);
        let mut registry = ToolRegistry::new();
        registry.upsert(descriptor("search", "1"), start);
        registry.upsert(descriptor("search", "1"), start + chrono::Duration::seconds(60));

        assert!(registry.prune(start + chrono::Duration::seconds(100), ttl).is_empty());
        assert_eq!(registry.names(), vec!["search"]);
    }
}
