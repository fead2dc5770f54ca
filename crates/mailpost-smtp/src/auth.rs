//! SASL responses for SMTP AUTH.
//!
//! Implements:
//! - PLAIN (RFC 4616)
//! - LOGIN (username and password answered to two `334` prompts)
//! - CRAM-MD5 (RFC 2195)
//! - XOAUTH2 (Google/Microsoft bearer token framing)

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;

use crate::error::{Error, Result};
use crate::types::AuthMechanism;

/// User credentials. For XOAUTH2 the secret is the access token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Authentication identity.
    pub user: String,
    secret: String,
}

impl Credentials {
    /// Creates credentials from a user name and a password or token.
    #[must_use]
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Picks the most preferred mechanism the server advertises and the
/// caller allows.
#[must_use]
pub fn select_mechanism(
    advertised: &[AuthMechanism],
    allowed: impl Fn(AuthMechanism) -> bool,
) -> Option<AuthMechanism> {
    AuthMechanism::PREFERENCE
        .into_iter()
        .find(|mechanism| advertised.contains(mechanism) && allowed(*mechanism))
}

/// Generates the PLAIN initial response: base64 of `\0user\0password`.
#[must_use]
pub fn plain_response(user: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{user}\0{password}"))
}

/// Encodes one LOGIN answer (the user name or the password).
#[must_use]
pub fn login_response(value: &str) -> String {
    STANDARD.encode(value)
}

/// Answers a CRAM-MD5 challenge.
///
/// `challenge` is the base64 text of the `334` reply. The answer is base64
/// of `user hexdigest`, where the digest is HMAC-MD5 over the decoded
/// challenge keyed with the password.
///
/// # Errors
///
/// Returns an error if the challenge is not valid base64.
pub fn cram_md5_response(user: &str, password: &str, challenge: &str) -> Result<String> {
    let challenge = STANDARD
        .decode(challenge.trim())
        .map_err(|e| Error::Auth(format!("invalid CRAM-MD5 challenge: {e}")))?;

    let mut mac = Hmac::<Md5>::new_from_slice(password.as_bytes())
        .map_err(|e| Error::Auth(format!("invalid CRAM-MD5 key: {e}")))?;
    mac.update(&challenge);
    let digest = hex::encode(mac.finalize().into_bytes());

    Ok(STANDARD.encode(format!("{user} {digest}")))
}

/// Generates the XOAUTH2 initial response:
/// base64 of `user=<user>\x01auth=Bearer <token>\x01\x01`.
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    STANDARD.encode(format!("user={user}\x01auth=Bearer {token}\x01\x01"))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn decode(response: &str) -> String {
        String::from_utf8(STANDARD.decode(response).unwrap()).unwrap()
    }

    #[test]
    fn test_plain_response_format() {
        assert_eq!(decode(&plain_response("pooh", "honey")), "\0pooh\0honey");
        assert_eq!(plain_response("test", "pass"), "AHRlc3QAcGFzcw==");
    }

    #[test]
    fn test_login_response() {
        assert_eq!(login_response("pooh"), "cG9vaA==");
    }

    #[test]
    fn test_cram_md5_rfc2195_vector() {
        let challenge = STANDARD.encode("<1896.697170952@postoffice.reston.mci.net>");
        let response = cram_md5_response("tim", "tanstaaftanstaaf", &challenge).unwrap();
        assert_eq!(decode(&response), "tim b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn test_cram_md5_rejects_bad_challenge() {
        let err = cram_md5_response("tim", "pw", "not base64!").unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn test_xoauth2_format() {
        assert_eq!(
            decode(&xoauth2_response("test@test.com", "abc")),
            "user=test@test.com\x01auth=Bearer abc\x01\x01"
        );
    }

    #[test]
    fn test_select_prefers_strongest_common() {
        let advertised = [AuthMechanism::XOAuth2, AuthMechanism::Login, AuthMechanism::Plain];
        assert_eq!(select_mechanism(&advertised, |_| true), Some(AuthMechanism::Plain));
        assert_eq!(
            select_mechanism(&advertised, |m| m != AuthMechanism::Plain),
            Some(AuthMechanism::Login)
        );
        assert_eq!(
            select_mechanism(&advertised, |m| m == AuthMechanism::CramMd5),
            None
        );
        assert_eq!(select_mechanism(&[], |_| true), None);
    }

    #[test]
    fn test_debug_hides_secret() {
        let credentials = Credentials::new("pooh", "honey");
        let shown = format!("{credentials:?}");
        assert!(shown.contains("pooh"));
        assert!(!shown.contains("honey"));
        assert_eq!(credentials.secret(), "honey");
    }
}
