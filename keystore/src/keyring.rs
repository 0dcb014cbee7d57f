use crate::keystore::Prefix;
use ed25519_dalek::VerifyingKey;
use std::path::PathBuf;

/// One key from the trust store, together with where it came from.
#[derive(Debug, Clone)]
pub struct TrustedKey {
    pub prefix: Prefix,
    pub fingerprint: String,
    pub key: VerifyingKey,
    pub path: PathBuf,
}

/// The union of trusted keys applicable to one image name.
#[derive(Debug, Default)]
pub struct Keyring {
    keys: Vec<TrustedKey>,
}

impl Keyring {
    pub(crate) fn push(&mut self, key: TrustedKey) {
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustedKey> {
        self.keys.iter()
    }

    pub fn find(&self, fingerprint: &str) -> Option<&TrustedKey> {
        self.keys.iter().find(|k| k.fingerprint == fingerprint)
    }
}
