use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Host configuration. Every field has a default, so a missing config
/// file yields a working (if opinionated) setup. Owned by [`crate::Host`]
/// rather than living in process-global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Root dataset everything lives under (`<root>/images`, `<root>/pods`).
    pub root_dataset: String,

    /// Forced mountpoint for the root dataset; inherited when unset.
    pub root_mountpoint: Option<PathBuf>,

    /// Interface jails bind their addresses to.
    pub jail_interface: String,

    /// Prefix prepended to pod UUIDs to form jail names.
    pub jail_name_prefix: String,

    /// Host-side address and prefix length of the jail subnet, CIDR
    /// notation. Pods are allocated addresses after this one.
    pub subnet: String,

    /// Whitespace-separated resolvers written into each app's
    /// resolv.conf; the host's own resolv.conf is copied when unset.
    pub dns_servers: Option<String>,

    /// Helper binary that enters a jail with a given identity, working
    /// directory, and environment.
    pub attach_helper: PathBuf,

    /// How long a jail status listing stays fresh.
    pub jail_status_ttl_secs: u64,

    /// Raw jail.conf parameters applied to every pod.
    pub jail_parameters: BTreeMap<String, String>,

    pub images: ImagesConfig,
    pub mds: MdsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Compression applied to archives brig writes; imports sniff the
    /// codec instead.
    pub compression: Compression,

    /// Keep a copy of the archive next to each imported/built image.
    pub store_archives: bool,

    /// Permit fetching images that have no detached signature.
    pub allow_no_signature: bool,

    /// Discovery template for archives ({name}/{version}/{os}/{arch}).
    pub archive_template: String,

    /// Discovery template for published keys ({prefix}).
    pub key_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MdsConfig {
    /// Port the metadata service listens on.
    pub port: u16,

    /// Hex-encoded HMAC key for metadata tokens; tokens are disabled
    /// when unset.
    pub token_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            root_dataset: "zroot/brig".to_string(),
            root_mountpoint: None,
            jail_interface: "lo1".to_string(),
            jail_name_prefix: "brig-".to_string(),
            subnet: "172.23.0.1/24".to_string(),
            dns_servers: None,
            attach_helper: PathBuf::from("/usr/local/libexec/brig-stage2"),
            jail_status_ttl_secs: 2,
            jail_parameters: BTreeMap::new(),
            images: ImagesConfig::default(),
            mds: MdsConfig::default(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        ImagesConfig {
            compression: Compression::Gzip,
            store_archives: false,
            allow_no_signature: false,
            archive_template: brig_remote::DEFAULT_ARCHIVE_TEMPLATE.to_string(),
            key_template: brig_remote::DEFAULT_KEY_TEMPLATE.to_string(),
        }
    }
}

impl Default for MdsConfig {
    fn default() -> Self {
        MdsConfig {
            port: 1104,
            token_key: None,
        }
    }
}

impl HostConfig {
    /// Loads config from `path`, or defaults when no file is given or
    /// the default location does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(HostConfig::default());
        };
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parses `subnet` into the host address and prefix length.
    pub fn host_subnet(&self) -> Result<(Ipv4Addr, u8)> {
        parse_cidr(&self.subnet)
            .ok_or_else(|| Error::UsageError(format!("invalid subnet {:?}", self.subnet)))
    }
}

fn parse_cidr(s: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = s.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    if prefix == 0 || prefix > 30 {
        // /31 and /32 have no room for the host plus one pod.
        return None;
    }
    Some((addr, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.root_dataset, "zroot/brig");
        assert_eq!(config.images.compression, Compression::Gzip);
        assert!(!config.images.allow_no_signature);
        assert_eq!(config.host_subnet().unwrap(), ("172.23.0.1".parse().unwrap(), 24));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: HostConfig = toml::from_str(
            r#"
            root_dataset = "tank/jails"
            subnet = "10.9.8.1/16"

            [images]
            compression = "none"
            allow_no_signature = true
            "#,
        )
        .unwrap();
        assert_eq!(config.root_dataset, "tank/jails");
        assert_eq!(config.images.compression, Compression::None);
        assert!(config.images.allow_no_signature);
        // Untouched sections keep their defaults.
        assert_eq!(config.mds.port, 1104);
        assert_eq!(config.jail_interface, "lo1");
    }

    #[test]
    fn test_bad_subnet() {
        let mut config = HostConfig::default();
        config.subnet = "not-a-subnet".to_string();
        assert!(config.host_subnet().is_err());
        config.subnet = "10.0.0.1/31".to_string();
        assert!(config.host_subnet().is_err());
    }
}
