use crate::error::RemoteError;
use std::fmt;
use std::path::PathBuf;

/// Where an archive, signature, or key lives: a local file or an HTTP
/// endpoint. Anything that does not look like a URL is treated as a
/// path, so `brig image import ./app.tgz` just works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Path(PathBuf),
    Url(String),
}

impl Location {
    pub fn parse(s: &str) -> Result<Self, RemoteError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RemoteError::InvalidLocation(s.to_string()));
        }
        if let Some(rest) = s.strip_prefix("file://") {
            if rest.is_empty() {
                return Err(RemoteError::InvalidLocation(s.to_string()));
            }
            return Ok(Location::Path(PathBuf::from(rest)));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Location::Url(s.to_string()));
        }
        if s.contains("://") {
            return Err(RemoteError::InvalidLocation(s.to_string()));
        }
        Ok(Location::Path(PathBuf::from(s)))
    }

    /// Derived location with a suffix appended, e.g. the conventional
    /// `.sig` next to an archive.
    pub fn with_suffix(&self, suffix: &str) -> Location {
        match self {
            Location::Path(p) => {
                let mut s = p.as_os_str().to_os_string();
                s.push(suffix);
                Location::Path(PathBuf::from(s))
            }
            Location::Url(u) => Location::Url(format!("{}{}", u, suffix)),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Path(p) => write!(f, "{}", p.display()),
            Location::Url(u) => f.write_str(u),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            Location::parse("https://example.com/a.tgz").unwrap(),
            Location::Url("https://example.com/a.tgz".to_string())
        );
        assert_eq!(
            Location::parse("./local/app.tgz").unwrap(),
            Location::Path(PathBuf::from("./local/app.tgz"))
        );
        assert_eq!(
            Location::parse("file:///tmp/app.tgz").unwrap(),
            Location::Path(PathBuf::from("/tmp/app.tgz"))
        );
        assert!(Location::parse("").is_err());
        assert!(Location::parse("ftp://example.com/a").is_err());
    }

    #[test]
    fn test_with_suffix() {
        assert_eq!(
            Location::parse("https://example.com/a.tgz")
                .unwrap()
                .with_suffix(".sig"),
            Location::Url("https://example.com/a.tgz.sig".to_string())
        );
        assert_eq!(
            Location::parse("/tmp/a.tgz").unwrap().with_suffix(".sig"),
            Location::Path(PathBuf::from("/tmp/a.tgz.sig"))
        );
    }
}
