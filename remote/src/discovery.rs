use std::collections::BTreeMap;

/// Template placeholders understood by [`discover`]: `{name}`,
/// `{version}`, `{os}`, `{arch}`.
pub const DEFAULT_ARCHIVE_TEMPLATE: &str = "https://{name}-{version}-{os}-{arch}.tgz";

/// Key discovery location for a name prefix; `{prefix}` placeholder.
pub const DEFAULT_KEY_TEMPLATE: &str = "https://{prefix}/pubkey.asc";

const SIGNATURE_SUFFIX: &str = ".sig";

/// Remote locations for an image matching a name and label constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredImage {
    pub archive: String,
    pub signature: String,
}

/// Resolves a (name, labels) query to archive and signature locations by
/// template substitution. Missing `version` defaults to `latest`;
/// missing `os`/`arch` default to the values brig itself runs on.
pub fn discover(
    name: &str,
    labels: &BTreeMap<String, String>,
    archive_template: &str,
) -> DiscoveredImage {
    let get = |key: &str, fallback: &str| {
        labels
            .get(key)
            .map(String::as_str)
            .unwrap_or(fallback)
            .to_string()
    };

    let archive = archive_template
        .replace("{name}", name)
        .replace("{version}", &get("version", "latest"))
        .replace("{os}", &get("os", std::env::consts::OS))
        .replace("{arch}", &get("arch", std::env::consts::ARCH));
    let signature = format!("{}{}", archive, SIGNATURE_SUFFIX);

    DiscoveredImage { archive, signature }
}

/// Published-key location for a trust prefix.
pub fn key_location(prefix: &str, key_template: &str) -> String {
    key_template.replace("{prefix}", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_discover_substitutes_labels() {
        let found = discover(
            "example.com/worker",
            &labels(&[("version", "1.2"), ("os", "freebsd"), ("arch", "amd64")]),
            DEFAULT_ARCHIVE_TEMPLATE,
        );
        assert_eq!(
            found.archive,
            "https://example.com/worker-1.2-freebsd-amd64.tgz"
        );
        assert_eq!(
            found.signature,
            "https://example.com/worker-1.2-freebsd-amd64.tgz.sig"
        );
    }

    #[test]
    fn test_discover_defaults_version() {
        let found = discover(
            "example.com/worker",
            &labels(&[("os", "freebsd"), ("arch", "amd64")]),
            DEFAULT_ARCHIVE_TEMPLATE,
        );
        assert_eq!(
            found.archive,
            "https://example.com/worker-latest-freebsd-amd64.tgz"
        );
    }

    #[test]
    fn test_key_location() {
        assert_eq!(
            key_location("example.com", DEFAULT_KEY_TEMPLATE),
            "https://example.com/pubkey.asc"
        );
    }
}
