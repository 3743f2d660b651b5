use serde::{Deserialize, Serialize};

/// Single environment variable passed to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    name: String,
    value: String,
}

impl EnvVar {
    pub fn new<K, V>(name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// List of environment variables for a container.
///
/// Stored as a list of name–value pairs and serialized as a transparent array wrapper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Env(pub Vec<EnvVar>);

impl Env {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the environment is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over all name–value pairs.
    pub fn iter(&self) -> impl Iterator<Item = &EnvVar> {
        self.0.iter()
    }

    /// Get the value for a name, returning the last matching entry.
    ///
    /// This allows simple override semantics when merging environments.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|var| var.name() == name)
            .map(|var| var.value())
    }

    /// Append a name–value pair to the environment.
    ///
    /// Later entries override earlier ones when queried via [`Env::get`].
    pub fn push<K, V>(&mut self, name: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.push(EnvVar::new(name, value));
    }

    /// Merge two environments, where entries from `other` override earlier ones.
    pub fn merged(&self, other: &Env) -> Env {
        let mut out = self.0.clone();
        out.extend(other.0.clone());
        Env(out)
    }
}

#[cfg(test)]
mod tests {
    use super::Env;

    #[test]
    fn env_new_is_empty() {
        let env = Env::new();
        assert!(env.is_empty());
        assert!(env.get("FOO").is_none());
    }

    #[test]
    fn env_push_and_override_last_wins() {
        let mut env = Env::new();
        env.push("FOO", "one");
        env.push("BAR", "x");
        env.push("FOO", "two");

        assert_eq!(env.get("FOO"), Some("two"));
        assert_eq!(env.get("BAR"), Some("x"));
        assert!(env.get("BAZ").is_none());
    }

    #[test]
    fn env_merged_other_overrides_base() {
        let base = {
            let mut e = Env::new();
            e.push("FOO", "base");
            e.push("BAR", "bar");
            e
        };

        let other = {
            let mut e = Env::new();
            e.push("FOO", "override");
            e.push("BAZ", "baz");
            e
        };

        let merged = base.merged(&other);

        assert_eq!(merged.get("FOO"), Some("override"));
        assert_eq!(merged.get("BAR"), Some("bar"));
        assert_eq!(merged.get("BAZ"), Some("baz"));
    }

    #[test]
    fn serde_transparent_roundtrip_json() {
        let mut env = Env::new();
        env.push("FOO", "bar");

        let json = serde_json::to_string(&env).unwrap();
        assert!(json.starts_with('['));
        assert!(json.contains("\"name\":\"FOO\""));

        let back: Env = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("FOO"), Some("bar"));
    }
}
