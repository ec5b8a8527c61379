//! Newtype wrappers for string identifiers.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Registry-relative image name such as `builder/precise-ruby-1.2.0`.
    ImageName
);

string_newtype!(
    /// Opaque identifier handed out for every accepted build request.
    BuildId
);

impl ImageName {
    /// Fully qualified reference under the given registry host.
    pub fn qualified(&self, registry: &str) -> String {
        format!("{}/{}", registry.trim_end_matches('/'), self.0)
    }

    /// Last path component, used to derive container names.
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_name_qualified_under_registry() {
        let name = ImageName::new("apps/hello-abc123");
        assert_eq!(name.qualified("registry.local:5000"), "registry.local:5000/apps/hello-abc123");
        assert_eq!(name.qualified("registry.local/"), "registry.local/apps/hello-abc123");
    }

    #[test]
    fn image_name_basename() {
        assert_eq!(ImageName::new("builder/precise-go-1.0").basename(), "precise-go-1.0");
        assert_eq!(ImageName::new("plain").basename(), "plain");
    }

    #[test]
    fn build_id_serializes_as_plain_string() {
        let id = BuildId::new("Ab12Cd34");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"Ab12Cd34\"");
        let back: BuildId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn newtype_compares_with_str() {
        let name = ImageName::from("base/precise-1.0");
        assert_eq!(name, "base/precise-1.0");
        assert_eq!(name.to_string(), "base/precise-1.0");
    }
}
