use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid, used for connection and session ids
pub fn generate_id() -> String {
    nanoid!(12)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Logical conversation/thread identifier. Every envelope on a relay
    /// session carries the same `ThreadId`.
    ThreadId
);

string_id!(
    /// Identifier of one agent run. Only used to derive the legacy channel.
    RunId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_serializes_transparently() {
        let id = ThreadId::from("t1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t1\"");
        assert_eq!(id.to_string(), "t1");
    }

    #[test]
    fn test_blank_id_is_empty() {
        assert!(ThreadId::from("   ").is_empty());
        assert!(!RunId::from("run-1").is_empty());
    }

    #[test]
    fn test_generate_id_length() {
        assert_eq!(generate_id().len(), 12);
    }
}
