use crate::armor::{fingerprint, parse_public_key, parse_signature};
use crate::error::KeystoreError;
use crate::keyring::{Keyring, TrustedKey};
use brig_core::Name;
use ed25519_dalek::Verifier;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name reserved for the root trust anchor, which matches
/// every image name.
const ROOT_DIR: &str = "@";

/// A trust prefix: either the root anchor or an image-name path prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Prefix {
    Root,
    Name(Name),
}

impl Prefix {
    /// Parses a caller-supplied prefix; the empty string denotes root.
    pub fn parse(s: &str) -> Result<Self, brig_core::SchemaError> {
        if s.is_empty() {
            return Ok(Prefix::Root);
        }
        Ok(Prefix::Name(Name::parse(s)?))
    }

    /// Whether a key stored under this prefix applies to `name`:
    /// root covers everything, a named prefix covers itself and its
    /// path descendants.
    pub fn covers(&self, name: &Name) -> bool {
        match self {
            Prefix::Root => true,
            Prefix::Name(prefix) => prefix.covers(name),
        }
    }

    /// Image names contain `/`, which cannot appear in a single
    /// directory name; it is escaped to `,` (not itself a valid name
    /// character).
    fn dir_name(&self) -> String {
        match self {
            Prefix::Root => ROOT_DIR.to_string(),
            Prefix::Name(name) => name.as_str().replace('/', ","),
        }
    }

    fn from_dir_name(dir: &str) -> Result<Self, KeystoreError> {
        if dir == ROOT_DIR {
            return Ok(Prefix::Root);
        }
        Name::parse(&dir.replace(',', "/"))
            .map(Prefix::Name)
            .map_err(|e| KeystoreError::BadKey(e.to_string()))
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Root => f.write_str(ROOT_DIR),
            Prefix::Name(name) => f.write_str(name.as_str()),
        }
    }
}

/// Persistent store of trusted signing keys, laid out as
/// `<root>/<escaped prefix>/<hex fingerprint>`.
pub struct Keystore {
    path: PathBuf,
}

impl Keystore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Keystore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists an armored public key under `prefix`. When
    /// `expected_fingerprint` is supplied it must match the parsed key;
    /// whether to prompt before trusting is the caller's policy.
    pub fn store_trusted_key(
        &self,
        prefix: &Prefix,
        armored: &str,
        expected_fingerprint: Option<&str>,
    ) -> Result<PathBuf, KeystoreError> {
        let key = parse_public_key(armored)?;
        let actual = fingerprint(&key);
        if let Some(expected) = expected_fingerprint
            && !expected.eq_ignore_ascii_case(&actual)
        {
            return Err(KeystoreError::FingerprintMismatch {
                expected: expected.to_lowercase(),
                actual,
            });
        }

        let dir = self.path.join(prefix.dir_name());
        fs::create_dir_all(&dir)?;
        let key_path = dir.join(&actual);
        fs::write(&key_path, armored)?;
        tracing::info!(prefix = %prefix, fingerprint = %actual, "trusted key stored");
        Ok(key_path)
    }

    fn load_key(&self, prefix: &Prefix, path: &Path) -> Result<TrustedKey, KeystoreError> {
        let armored = fs::read_to_string(path)?;
        let key = parse_public_key(&armored)?;
        let fp = fingerprint(&key);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if fp != file_name {
            return Err(KeystoreError::FingerprintMismatch {
                expected: file_name,
                actual: fp,
            });
        }
        Ok(TrustedKey {
            prefix: prefix.clone(),
            fingerprint: fp,
            key,
            path: path.to_path_buf(),
        })
    }

    fn walk<F>(&self, mut visit: F) -> Result<(), KeystoreError>
    where
        F: FnMut(&Keystore, &Prefix, &Path) -> Result<(), KeystoreError>,
    {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let prefix = Prefix::from_dir_name(&entry.file_name().to_string_lossy())?;
            for key_entry in fs::read_dir(entry.path())? {
                let key_entry = key_entry?;
                if key_entry.file_type()?.is_file() {
                    visit(self, &prefix, &key_entry.path())?;
                }
            }
        }
        Ok(())
    }

    pub fn get_all_keys(&self) -> Result<Keyring, KeystoreError> {
        let mut keyring = Keyring::default();
        self.walk(|ks, prefix, path| {
            keyring.push(ks.load_key(prefix, path)?);
            Ok(())
        })?;
        Ok(keyring)
    }

    /// The union of keys stored under the root prefix and under every
    /// prefix that is a path-ancestor (or equal) of `name`.
    pub fn get_keys_for(&self, name: &Name) -> Result<Keyring, KeystoreError> {
        let mut keyring = Keyring::default();
        self.walk(|ks, prefix, path| {
            if prefix.covers(name) {
                keyring.push(ks.load_key(prefix, path)?);
            }
            Ok(())
        })?;
        Ok(keyring)
    }

    /// Verifies an armored detached signature over `signed` against the
    /// keyring for `name`. `UnknownIssuer` (no trusted key matches the
    /// signature's issuer fingerprint) is the caller's cue to attempt
    /// key discovery and retry once.
    pub fn check_signature(
        &self,
        name: &Name,
        signed: &[u8],
        signature: &str,
    ) -> Result<TrustedKey, KeystoreError> {
        let sig = parse_signature(signature)?;
        let keyring = self.get_keys_for(name)?;
        let trusted = keyring
            .find(&sig.issuer)
            .ok_or_else(|| KeystoreError::UnknownIssuer {
                name: name.to_string(),
                issuer: sig.issuer.clone(),
            })?;
        trusted
            .key
            .verify(signed, &sig.signature)
            .map_err(|_| KeystoreError::SignatureInvalid(name.to_string()))?;
        Ok(trusted.clone())
    }

    /// Removes every stored key with the given fingerprint; returns the
    /// prefixes that lost a key.
    pub fn untrust_key(&self, fingerprint: &str) -> Result<Vec<Prefix>, KeystoreError> {
        let mut removed = Vec::new();
        self.walk(|_, prefix, path| {
            if path.file_name().is_some_and(|n| n.to_string_lossy() == fingerprint) {
                fs::remove_file(path)?;
                removed.push(prefix.clone());
            }
            Ok(())
        })?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armor::{armor_public_key, sign_detached};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use tempfile::TempDir;

    fn new_key() -> (SigningKey, String, String) {
        let key = SigningKey::generate(&mut OsRng);
        let armored = armor_public_key(&key.verifying_key());
        let fp = fingerprint(&key.verifying_key());
        (key, armored, fp)
    }

    fn name(s: &str) -> Name {
        Name::parse(s).unwrap()
    }

    #[test]
    fn test_store_layout() {
        let dir = TempDir::new().unwrap();
        let ks = Keystore::new(dir.path());
        let (_, armored, fp) = new_key();

        let cases = [
            (Prefix::Root, "@"),
            (Prefix::parse("example.com").unwrap(), "example.com"),
            (Prefix::parse("example.com/foo").unwrap(), "example.com,foo"),
        ];
        for (prefix, subdir) in &cases {
            let path = ks.store_trusted_key(prefix, &armored, None).unwrap();
            assert_eq!(path, dir.path().join(subdir).join(&fp));
            assert_eq!(std::fs::read_to_string(&path).unwrap(), armored);
        }
    }

    #[test]
    fn test_store_checks_fingerprint() {
        let dir = TempDir::new().unwrap();
        let ks = Keystore::new(dir.path());
        let (_, armored, fp) = new_key();

        assert!(
            ks.store_trusted_key(&Prefix::Root, &armored, Some(&fp))
                .is_ok()
        );
        let err = ks
            .store_trusted_key(&Prefix::Root, &armored, Some(&"0".repeat(64)))
            .unwrap_err();
        assert!(matches!(err, KeystoreError::FingerprintMismatch { .. }));
    }

    #[test]
    fn test_keyring_prefix_scoping() {
        let dir = TempDir::new().unwrap();
        let ks = Keystore::new(dir.path());
        let (_, key_foo, _) = new_key();
        let (_, key_bar, _) = new_key();

        ks.store_trusted_key(&Prefix::parse("example.com/foo").unwrap(), &key_foo, None)
            .unwrap();
        ks.store_trusted_key(
            &Prefix::parse("example.com/foo/bar").unwrap(),
            &key_bar,
            None,
        )
        .unwrap();

        let expectations = [
            ("eggsample.com", 0),
            ("eggsample.com/foo", 0),
            ("eggsample.com/foo/bar", 0),
            ("example.com", 0),
            ("example.com/foo", 1),
            ("example.com/foo/baz", 1),
            ("example.com/foo/bar", 2),
            ("example.com/foo/bar/baz", 2),
            ("example.com/foobar", 0),
            ("example.com/baz", 0),
        ];
        for (n, expected) in expectations {
            assert_eq!(
                ks.get_keys_for(&name(n)).unwrap().len(),
                expected,
                "keys for {n}"
            );
        }

        let (_, key_root, _) = new_key();
        ks.store_trusted_key(&Prefix::Root, &key_root, None).unwrap();

        for (n, expected) in expectations {
            assert_eq!(
                ks.get_keys_for(&name(n)).unwrap().len(),
                expected + 1,
                "keys for {n} with root anchor"
            );
        }

        assert_eq!(ks.get_all_keys().unwrap().len(), 3);
    }

    #[test]
    fn test_check_signature() {
        let dir = TempDir::new().unwrap();
        let ks = Keystore::new(dir.path());
        let (signing, armored, fp) = new_key();
        let prefix = Prefix::parse("example.com").unwrap();
        ks.store_trusted_key(&prefix, &armored, None).unwrap();

        let archive = b"archive bytes";
        let signature = sign_detached(&signing, archive);

        // Trusted for the prefix and everything below it.
        let trusted = ks
            .check_signature(&name("example.com/foo"), archive, &signature)
            .unwrap();
        assert_eq!(trusted.fingerprint, fp);
        assert_eq!(trusted.prefix, prefix);

        // Tampered payload.
        let err = ks
            .check_signature(&name("example.com/foo"), b"other bytes", &signature)
            .unwrap_err();
        assert!(matches!(err, KeystoreError::SignatureInvalid(_)));

        // A key trusted for a subtree does not cover its parent.
        let (sub_signing, sub_armored, _) = new_key();
        ks.store_trusted_key(
            &Prefix::parse("example.com/sub").unwrap(),
            &sub_armored,
            None,
        )
        .unwrap();
        let sub_signature = sign_detached(&sub_signing, archive);
        let err = ks
            .check_signature(&name("example.com"), archive, &sub_signature)
            .unwrap_err();
        assert!(matches!(err, KeystoreError::UnknownIssuer { .. }));
    }

    #[test]
    fn test_unknown_issuer_before_any_trust() {
        let dir = TempDir::new().unwrap();
        let ks = Keystore::new(dir.path());
        let (signing, _, _) = new_key();
        let signature = sign_detached(&signing, b"data");
        let err = ks
            .check_signature(&name("example.com"), b"data", &signature)
            .unwrap_err();
        assert!(matches!(err, KeystoreError::UnknownIssuer { .. }));
    }

    #[test]
    fn test_untrust_key() {
        let dir = TempDir::new().unwrap();
        let ks = Keystore::new(dir.path());
        let (_, armored, fp) = new_key();

        let p1 = Prefix::parse("example.com").unwrap();
        let p2 = Prefix::parse("example.org/other").unwrap();
        ks.store_trusted_key(&p1, &armored, None).unwrap();
        ks.store_trusted_key(&p2, &armored, None).unwrap();

        let mut removed = ks.untrust_key(&fp).unwrap();
        removed.sort();
        assert_eq!(removed, vec![p1, p2]);
        assert!(ks.get_all_keys().unwrap().is_empty());

        assert!(ks.untrust_key(&fp).unwrap().is_empty());
    }
}
