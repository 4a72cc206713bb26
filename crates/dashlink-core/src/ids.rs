//! String-backed identifiers for consumers, charts and sync groups.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a stream consumer (a chart or any other bound widget).
    ConsumerId
);

string_id!(
    /// Identifier of a chart registered with the synchronizer.
    ChartId
);

string_id!(
    /// Identifier of a sync group (e.g. "main").
    GroupId
);

impl GroupId {
    /// The group charts join when none is given.
    pub fn main() -> Self {
        Self::new("main")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_conversion() {
        let id = ConsumerId::from("price-chart");
        assert_eq!(id.to_string(), "price-chart");
        assert_eq!(id.as_str(), "price-chart");
        assert_eq!(ChartId::from("a".to_string()), ChartId::new("a"));
    }

    #[test]
    fn test_group_id_serializes_transparently() {
        let json = serde_json::to_string(&GroupId::main()).unwrap();
        assert_eq!(json, "\"main\"");
    }
}
