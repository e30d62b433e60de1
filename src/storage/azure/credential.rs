//! Shared Key credentials.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::{Debug, Formatter};

use crate::errors::{FsError, FsResult};

type HmacSha256 = Hmac<Sha256>;

/// Storage account name plus the decoded account key.
///
/// The key is decoded once at construction and never mutated afterwards.
#[derive(Clone)]
pub struct Credentials {
    account: String,
    key: Vec<u8>,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from an account name and a base64-encoded key.
    pub fn new(account: impl Into<String>, key: &str) -> FsResult<Self> {
        let account = account.into();
        if account.is_empty() {
            return Err(FsError::InvalidCredentials {
                message: "account name is empty".to_string(),
            });
        }
        let key = BASE64_STANDARD
            .decode(key.trim())
            .map_err(|e| FsError::InvalidCredentials {
                message: format!("account key is not valid base64: {}", e),
            })?;
        if key.is_empty() {
            return Err(FsError::InvalidCredentials {
                message: "account key is empty".to_string(),
            });
        }
        Ok(Self { account, key })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Base64-encoded HMAC-SHA256 of `content` keyed by the account key.
    pub fn sign(&self, content: &str) -> String {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(content.as_bytes());
        BASE64_STANDARD.encode(mac.finalize().into_bytes())
    }
}
