//! Request signing for venues that sign with HMAC-SHA256. Binance
//! hex-encodes the digest of the URL-encoded query; OKX base64-encodes the
//! digest of `timestamp + method + path + body` instead, for both REST
//! requests and the signed WS login frame — same primitive, different
//! encoding, so both live here rather than being duplicated per venue crate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(secret: &str, message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// `hex(hmac_sha256(secret, query))`, used verbatim as the `signature` query
/// parameter.
pub fn hmac_sha256_hex(secret: &str, query: &[u8]) -> String {
    hex::encode(hmac_sha256(secret, query))
}

/// `base64(hmac_sha256(secret, message))`, OKX's REST/WS-login signature
/// encoding.
pub fn hmac_sha256_base64(secret: &str, message: &[u8]) -> String {
    BASE64.encode(hmac_sha256(secret, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic() {
        let query = b"symbol=ETHUSDT&side=BUY&timestamp=1";
        assert_eq!(hmac_sha256_hex("secret", query), hmac_sha256_hex("secret", query));
    }

    #[test]
    fn signature_is_64_hex_chars() {
        let signature = hmac_sha256_hex("s", b"symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hex_signature_matches_known_fixture() {
        let signature = hmac_sha256_hex("s", b"symbol=BTCUSDT&timestamp=1700000000000");
        assert_eq!(signature, "3c857daf0856e16eece67e541749c33209e07989283714ff0bc5e347d783829d");
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let query = b"symbol=BTCUSDT&timestamp=1700000000000";
        assert_ne!(hmac_sha256_hex("s1", query), hmac_sha256_hex("s2", query));
    }

    #[test]
    fn different_queries_produce_different_signatures() {
        assert_ne!(
            hmac_sha256_hex("s", b"symbol=BTCUSDT&timestamp=1"),
            hmac_sha256_hex("s", b"symbol=BTCUSDT&timestamp=2")
        );
    }

    #[test]
    fn base64_signature_is_deterministic_and_standard_alphabet() {
        let message = b"1700000000000POST/api/v5/trade/order{}";
        let signature = hmac_sha256_base64("secret", message);
        assert_eq!(signature, hmac_sha256_base64("secret", message));
        assert!(signature.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
    }

    #[test]
    fn base64_and_hex_signatures_of_the_same_input_differ_in_form_not_meaning() {
        let message = b"same-message";
        let hex_sig = hmac_sha256_hex("secret", message);
        let b64_sig = hmac_sha256_base64("secret", message);
        assert_ne!(hex_sig, b64_sig);
    }
}
