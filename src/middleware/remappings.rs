use std::{collections::BTreeMap, fmt};

/// Remapping key overriding the master endpoint
pub const MASTER_KEY: &str = "__master";
/// Remapping key overriding the hostname this node announces
pub const HOSTNAME_KEY: &str = "__hostname";

/// Environment variable consulted by default discovery for the master URL
pub const MASTER_ENV: &str = "CHATTER_MASTER_URI";
/// Environment variable consulted by default discovery for the hostname
pub const HOSTNAME_ENV: &str = "CHATTER_HOSTNAME";

pub const DEFAULT_MASTER_URI: &str = "mqtt://localhost:1883";

/// Ordered `name := value` overrides handed to [`super::Middleware::init`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Remappings {
    entries: BTreeMap<String, String>,
}

impl Remappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit master and host endpoints, bypassing discovery.
    pub fn with_endpoints(master_url: &str, host_url: &str) -> Self {
        let mut remappings = Self::new();
        remappings.insert(MASTER_KEY, master_url);
        remappings.insert(HOSTNAME_KEY, host_url);
        remappings
    }

    /// Default discovery: environment first, then built-in defaults, with
    /// `name:=value` arguments taking precedence over both.
    pub fn discover<S: AsRef<str>>(args: &[S]) -> Self {
        let mut remappings = Self::new();

        let master = std::env::var(MASTER_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MASTER_URI.to_string());
        remappings.insert(MASTER_KEY, master);

        let hostname = std::env::var(HOSTNAME_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| whoami::fallible::hostname().unwrap_or_else(|_| "localhost".into()));
        remappings.insert(HOSTNAME_KEY, hostname);

        let (overrides, _) = Self::from_args(args);
        remappings.extend(overrides);
        remappings
    }

    /// Split `name:=value` arguments out of an argument list.
    ///
    /// Returns the remappings and the arguments that were left untouched.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> (Self, Vec<String>) {
        let mut remappings = Self::new();
        let mut rest = Vec::new();
        for arg in args {
            let arg = arg.as_ref();
            match arg.split_once(":=") {
                Some((name, value)) if !name.trim().is_empty() => {
                    remappings.insert(name.trim(), value.trim());
                }
                _ => rest.push(arg.to_string()),
            }
        }
        (remappings, rest)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn extend(&mut self, other: Remappings) {
        self.entries.extend(other.entries);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn master(&self) -> Option<&str> {
        self.get(MASTER_KEY)
    }

    pub fn hostname(&self) -> Option<&str> {
        self.get(HOSTNAME_KEY)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Remappings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.entries {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{name}:={value}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_endpoints() {
        let remappings = Remappings::with_endpoints("mqtt://broker:1884", "node-a");
        assert_eq!(remappings.master(), Some("mqtt://broker:1884"));
        assert_eq!(remappings.hostname(), Some("node-a"));
        assert_eq!(
            remappings.to_string(),
            "__hostname:=node-a __master:=mqtt://broker:1884"
        );
    }

    #[test]
    fn test_from_args_splits_remappings() {
        let args = ["__master:=mqtt://10.0.0.2", "--verbose", ":=bogus", "rate := 5"];
        let (remappings, rest) = Remappings::from_args(&args);

        assert_eq!(remappings.master(), Some("mqtt://10.0.0.2"));
        assert_eq!(remappings.get("rate"), Some("5"));
        assert_eq!(remappings.len(), 2);
        assert_eq!(rest, vec!["--verbose".to_string(), ":=bogus".to_string()]);
    }

    #[test]
    fn test_discover_fills_both_keys_and_honors_args() {
        let remappings = Remappings::discover(&["__hostname:=pinned"]);
        assert!(remappings.master().is_some());
        assert_eq!(remappings.hostname(), Some("pinned"));
    }
}
