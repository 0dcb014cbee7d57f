mod image;
mod pod;
mod trust;

pub use image::{ImageCommands, image};
pub use pod::{PodCommands, pod};
pub use trust::{TrustCommands, trust};

use brig_runtime::{Error, Result};
use std::collections::BTreeMap;

/// Parses repeated `--label key=value` arguments.
pub(crate) fn parse_labels(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::UsageError(format!(
                "label {:?} is not of the form key=value",
                pair
            )));
        };
        labels.insert(key.to_string(), value.to_string());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        let labels =
            parse_labels(&["os=freebsd".to_string(), "version=1.2".to_string()]).unwrap();
        assert_eq!(labels["os"], "freebsd");
        assert_eq!(labels["version"], "1.2");
        assert!(parse_labels(&["nope".to_string()]).is_err());
    }
}
