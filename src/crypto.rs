use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::{FbxError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Derive the session password from the app token and a login challenge.
///
/// The password is the lowercase hex encoding of
/// `HMAC-SHA1(key = app_token, message = challenge)`. It is the only value
/// derived from the app token that is ever sent to the device.
pub fn compute_password(app_token: &str, challenge: &str) -> Result<String> {
    if app_token.is_empty() {
        return Err(FbxError::Auth("app token is empty".to_owned()));
    }
    let mut mac = HmacSha1::new_from_slice(app_token.as_bytes())
        .map_err(|e| FbxError::Auth(e.to_string()))?;
    mac.update(challenge.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // Known HMAC-SHA1 outputs (first one from RFC 2202)
    #[rstest]
    #[case(
        "Jefe",
        "what do ya want for nothing?",
        "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
    )]
    #[case("secret", "abc123", "8657345ce1d0a7304b31540a34ec4355a86c2b69")]
    #[case(
        "key",
        "The quick brown fox jumps over the lazy dog",
        "de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9"
    )]
    fn matches_reference_vectors(
        #[case] key: &str,
        #[case] challenge: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(compute_password(key, challenge).unwrap(), expected);
    }

    #[test]
    fn same_inputs_same_password() {
        let first = compute_password("secret", "abc123").unwrap();
        let _ = compute_password("other", "zzz").unwrap();
        let second = compute_password("secret", "abc123").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, first.to_lowercase());
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = compute_password("", "abc123").unwrap_err();
        assert!(matches!(err, FbxError::Auth(_)));
    }
}
