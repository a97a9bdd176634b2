use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use poehali_core::repository::TokenDigest;

const TOKEN_BYTES: usize = 32;
/// base64url of 32 bytes, unpadded
const ENCODED_LEN: usize = 43;

/// Bearer capability for cancelling one booking. Handed to the booker once;
/// the store only ever sees [`CancelToken::digest`].
#[derive(Clone, PartialEq, Eq)]
pub struct CancelToken(String);

impl CancelToken {
    /// 256 bits from the OS CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn digest(&self) -> TokenDigest {
        digest(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CancelToken(********)")
    }
}

pub fn digest(raw: &str) -> TokenDigest {
    TokenDigest(Sha256::digest(raw.as_bytes()).into())
}

/// Shape check only; says nothing about whether the token exists.
pub fn is_well_formed(raw: &str) -> bool {
    raw.len() == ENCODED_LEN
        && URL_SAFE_NO_PAD
            .decode(raw)
            .map_or(false, |bytes| bytes.len() == TOKEN_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_tokens_are_well_formed_and_distinct() {
        let tokens: HashSet<String> = (0..100).map(|_| CancelToken::generate().into_string()).collect();
        assert_eq!(tokens.len(), 100);
        assert!(tokens.iter().all(|t| is_well_formed(t)));
    }

    #[test]
    fn test_digest_is_stable_and_not_the_token() {
        let token = CancelToken::generate();
        assert_eq!(token.digest(), digest(token.as_str()));
        assert!(!token.digest().ct_eq(token.as_str().as_bytes()));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("not-a-token"));
        assert!(!is_well_formed(&"!".repeat(ENCODED_LEN)));
    }

    #[test]
    fn test_debug_hides_token() {
        let token = CancelToken::generate();
        assert!(!format!("{:?}", token).contains(token.as_str()));
    }
}
