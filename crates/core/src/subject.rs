use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Capability bound for the opaque key under which raw data and evidence are
/// filed (a network link, a user account, a host, ...).
///
/// Subjects are used as map keys by the event buffer (`Eq + Hash`), cross
/// process boundaries with the distributed executor (`Serialize +
/// DeserializeOwned`), and appear in log fields (`Display`). Any type
/// satisfying these bounds is a subject; there is no registration step.
pub trait Subject:
    Clone
    + Eq
    + Hash
    + fmt::Debug
    + fmt::Display
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> Subject for T where
    T: Clone
        + Eq
        + Hash
        + fmt::Debug
        + fmt::Display
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// A client/server network flow pair — the default subject type for network
/// detection deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub client: String,
    pub server: String,
}

impl Link {
    pub fn new(client: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            server: server.into(),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.client, self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn link_display() {
        let link = Link::new("192.168.1.4", "dns.example.org");
        assert_eq!(link.to_string(), "[192.168.1.4 dns.example.org]");
    }

    #[test]
    fn link_as_map_key() {
        let mut map: HashMap<Link, i64> = HashMap::new();
        map.insert(Link::new("a", "b"), 1);
        map.insert(Link::new("a", "b"), 2);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&Link::new("a", "b")], 2);
    }

    #[test]
    fn link_serde_roundtrip() {
        let link = Link::new("10.0.0.1", "mail.example.org");
        let json = serde_json::to_string(&link).unwrap();
        let back: Link = serde_json::from_str(&json).unwrap();
        assert_eq!(link, back);
    }
}
