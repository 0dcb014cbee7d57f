mod armor;
mod error;
mod keyring;
mod keystore;

pub use armor::{armor_public_key, armor_signature, sign_detached};
pub use error::KeystoreError;
pub use keyring::{Keyring, TrustedKey};
pub use keystore::{Keystore, Prefix};
