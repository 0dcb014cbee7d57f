use crate::error::KeystoreError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

const KEY_KIND: &str = "BRIG PUBLIC KEY";
const SIG_KIND: &str = "BRIG SIGNATURE";
const ISSUER_HEADER: &str = "Issuer";
const WRAP_WIDTH: usize = 64;

/// Hex SHA-256 of the raw public key bytes; also the on-disk filename of
/// a trusted key.
pub(crate) fn fingerprint(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn armor(kind: &str, headers: &[(&str, &str)], data: &[u8]) -> String {
    let mut out = format!("-----BEGIN {}-----\n", kind);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\n", name, value));
    }
    if !headers.is_empty() {
        out.push('\n');
    }
    let encoded = STANDARD.encode(data);
    for chunk in encoded.as_bytes().chunks(WRAP_WIDTH) {
        out.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
        out.push('\n');
    }
    out.push_str(&format!("-----END {}-----\n", kind));
    out
}

fn dearmor(kind: &str, text: &str) -> Result<(Vec<(String, String)>, Vec<u8>), KeystoreError> {
    let begin = format!("-----BEGIN {}-----", kind);
    let end = format!("-----END {}-----", kind);

    let mut lines = text.lines().map(str::trim);
    for line in lines.by_ref() {
        if line == begin {
            break;
        }
        if line.starts_with("-----BEGIN ") {
            return Err(KeystoreError::Armor(format!(
                "expected {:?}, found {:?}",
                begin, line
            )));
        }
    }

    let mut headers = Vec::new();
    let mut body = String::new();
    let mut in_body = false;
    let mut found_end = false;
    for line in lines {
        if line == end {
            found_end = true;
            break;
        }
        if !in_body {
            if line.is_empty() {
                in_body = true;
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
                continue;
            }
            in_body = true;
        }
        body.push_str(line);
    }
    if !found_end {
        return Err(KeystoreError::Armor(format!("missing {:?}", end)));
    }

    let data = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| KeystoreError::Armor(e.to_string()))?;
    Ok((headers, data))
}

/// Renders a public key as an armored text block, the format accepted by
/// the trust store.
pub fn armor_public_key(key: &VerifyingKey) -> String {
    armor(KEY_KIND, &[], key.as_bytes())
}

pub(crate) fn parse_public_key(text: &str) -> Result<VerifyingKey, KeystoreError> {
    let (_, data) = dearmor(KEY_KIND, text)?;
    let bytes: [u8; 32] = data
        .as_slice()
        .try_into()
        .map_err(|_| KeystoreError::BadKey(format!("{} byte key", data.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| KeystoreError::BadKey(e.to_string()))
}

/// Renders a detached signature, binding it to its issuer by
/// fingerprint in an armor header.
pub fn armor_signature(issuer: &VerifyingKey, signature: &Signature) -> String {
    armor(
        SIG_KIND,
        &[(ISSUER_HEADER, &fingerprint(issuer))],
        &signature.to_bytes(),
    )
}

/// Produces an armored detached signature over `data`. Used by image
/// publishing tooling and tests; the runtime itself only verifies.
pub fn sign_detached(key: &SigningKey, data: &[u8]) -> String {
    armor_signature(&key.verifying_key(), &key.sign(data))
}

pub(crate) struct DetachedSignature {
    pub issuer: String,
    pub signature: Signature,
}

pub(crate) fn parse_signature(text: &str) -> Result<DetachedSignature, KeystoreError> {
    let (headers, data) = dearmor(SIG_KIND, text)?;
    let issuer = headers
        .iter()
        .find(|(name, _)| name == ISSUER_HEADER)
        .map(|(_, value)| value.to_lowercase())
        .ok_or_else(|| KeystoreError::Armor("signature has no issuer header".to_string()))?;
    let bytes: [u8; 64] = data
        .as_slice()
        .try_into()
        .map_err(|_| KeystoreError::Armor(format!("{} byte signature", data.len())))?;
    Ok(DetachedSignature {
        issuer,
        signature: Signature::from_bytes(&bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_key_round_trip() {
        let key = SigningKey::generate(&mut OsRng);
        let armored = armor_public_key(&key.verifying_key());
        assert!(armored.starts_with("-----BEGIN BRIG PUBLIC KEY-----"));
        let parsed = parse_public_key(&armored).unwrap();
        assert_eq!(parsed, key.verifying_key());
    }

    #[test]
    fn test_signature_round_trip() {
        let key = SigningKey::generate(&mut OsRng);
        let armored = sign_detached(&key, b"payload");
        let parsed = parse_signature(&armored).unwrap();
        assert_eq!(parsed.issuer, fingerprint(&key.verifying_key()));
        use ed25519_dalek::Verifier;
        key.verifying_key()
            .verify(b"payload", &parsed.signature)
            .unwrap();
    }

    #[test]
    fn test_dearmor_rejects_wrong_kind() {
        let key = SigningKey::generate(&mut OsRng);
        let armored = armor_public_key(&key.verifying_key());
        assert!(parse_signature(&armored).is_err());
    }

    #[test]
    fn test_dearmor_rejects_truncated() {
        let key = SigningKey::generate(&mut OsRng);
        let armored = armor_public_key(&key.verifying_key());
        let truncated = armored.lines().take(2).collect::<Vec<_>>().join("\n");
        assert!(parse_public_key(&truncated).is_err());
    }
}
