use hmac::{Hmac, Mac};
use sha2::Sha512;
use uuid::Uuid;

type HmacSha512 = Hmac<Sha512>;

const TOKEN_HEX_LEN: usize = 64 * 2;

/// HMAC-SHA512 over the pod UUID, hex encoded. The shared secret ties
/// tokens to this host; the UUID scopes them to one pod.
pub(crate) fn token(secret: &[u8], pod: &Uuid) -> String {
    let mut mac = HmacSha512::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(pod.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a received token. With no secret configured the only valid
/// token is the empty string.
pub(crate) fn verify_token(secret: Option<&[u8]>, pod: &Uuid, received: &str) -> bool {
    let Some(secret) = secret else {
        return received.is_empty();
    };

    // Length check before decoding keeps obviously wrong (and possibly
    // malicious) input away from the comparison.
    if received.len() != TOKEN_HEX_LEN {
        return false;
    }
    let Ok(received) = hex::decode(received) else {
        return false;
    };

    let mut mac = HmacSha512::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(pod.as_bytes());
    mac.verify_slice(&received).is_ok()
}
