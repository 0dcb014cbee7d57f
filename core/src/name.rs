use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowercase, path-structured identifier used for image names, app names,
/// and trust prefixes: `[a-z0-9]+` segments joined by `-`, `.`, `_`, `~`
/// or `/` (e.g. `example.com/worker-base`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        if !is_valid_name(s) {
            return Err(SchemaError::InvalidName(s.to_string()));
        }
        Ok(Name(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path-segment ancestry: `example.com` is an ancestor of
    /// `example.com/foo/bar`, but not of `example.com-foo` or of itself.
    pub fn is_ancestor_of(&self, other: &Name) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Ancestry including equality, the trust-scoping relation: a key
    /// trusted for a prefix covers the prefix itself and everything below.
    pub fn covers(&self, other: &Name) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// The leading path segment, e.g. `example.com` for
    /// `example.com/foo/bar`.
    pub fn domain(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }
}

fn is_valid_name(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let mut after_separator = true;
    for c in s.chars() {
        match c {
            'a'..='z' | '0'..='9' => after_separator = false,
            '-' | '.' | '_' | '~' | '/' => {
                if after_separator {
                    return false;
                }
                after_separator = true;
            }
            _ => return false,
        }
    }
    !after_separator
}

impl FromStr for Name {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::parse(s)
    }
}

impl TryFrom<String> for Name {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Name::parse(&s)
    }
}

impl From<Name> for String {
    fn from(n: Name) -> String {
        n.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        for ok in [
            "example.com",
            "example.com/foo",
            "example.com/foo-bar/baz_2",
            "a",
            "worker~1",
        ] {
            assert!(Name::parse(ok).is_ok(), "{ok} should parse");
        }

        for bad in [
            "",
            "Example.com",
            "example..com",
            "/example.com",
            "example.com/",
            "example com",
            "example.com//foo",
            "-example",
        ] {
            assert!(Name::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_ancestry() {
        let base = Name::parse("example.com").unwrap();
        let child = Name::parse("example.com/foo").unwrap();
        let grandchild = Name::parse("example.com/foo/bar").unwrap();
        let sibling = Name::parse("example.com/foobar").unwrap();

        assert!(base.is_ancestor_of(&child));
        assert!(base.is_ancestor_of(&grandchild));
        assert!(child.is_ancestor_of(&grandchild));

        assert!(!child.is_ancestor_of(&sibling));
        assert!(!child.is_ancestor_of(&base));
        assert!(!base.is_ancestor_of(&base));

        assert!(base.covers(&base));
        assert!(base.covers(&grandchild));
        assert!(!child.covers(&sibling));
    }

    #[test]
    fn test_domain() {
        assert_eq!(Name::parse("example.com/foo/bar").unwrap().domain(), "example.com");
        assert_eq!(Name::parse("worker").unwrap().domain(), "worker");
    }

    #[test]
    fn test_serde_rejects_invalid() {
        assert!(serde_json::from_str::<Name>("\"example.com/ok\"").is_ok());
        assert!(serde_json::from_str::<Name>("\"Not A Name\"").is_err());
    }
}
