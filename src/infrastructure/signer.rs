//! Request authentication for dispatched orders.
//!
//! Every outgoing order is serialized to a sorted url-encoded query,
//! digested, and MAC'd with the owning user's secret. The nonce and the
//! signing-method tag are injected here so callers only supply the
//! business parameters.

use crate::domain::types::SignedRequest;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::form_urlencoded;

/// Reserved parameter key carrying the per-request nonce.
pub const NONCE_KEY: &str = "nonce";
/// Reserved parameter key carrying the signing-method tag.
pub const SIGN_METHOD_KEY: &str = "sign_method";
/// Value of the signing-method tag.
pub const SIGN_METHOD: &str = "HmacSHA256";

const NONCE_BYTES: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Stateless signer: all per-request state lives in the parameter map,
/// all per-user state in the secret passed to [`sign`](Self::sign).
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSigner;

impl RequestSigner {
    pub fn new() -> Self {
        Self
    }

    /// Assemble a one-shot signed request.
    ///
    /// Injects a fresh nonce and the method tag unless the caller
    /// already set them, serializes the full map as an url-encoded
    /// query in ascending key order, and signs it. Identical params
    /// (nonce included) and secret always produce the same signature.
    pub fn sign(&self, mut params: BTreeMap<String, String>, secret: &str) -> SignedRequest {
        params
            .entry(NONCE_KEY.to_string())
            .or_insert_with(Self::generate_nonce);
        params
            .entry(SIGN_METHOD_KEY.to_string())
            .or_insert_with(|| SIGN_METHOD.to_string());

        let query = Self::canonical_query(&params);
        let signature = Self::sign_query(&query, secret);

        SignedRequest { params, signature }
    }

    /// Url-encoded query over the map. BTreeMap iteration gives the
    /// ascending key order, so two maps with the same entries serialize
    /// byte-identically regardless of how they were built.
    fn canonical_query(params: &BTreeMap<String, String>) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    /// SHA-256 digest of the query rendered as uppercase hex, then
    /// HMAC-SHA256 of that hex string with the secret, lowercase hex.
    fn sign_query(query: &str, secret: &str) -> String {
        let digest = hex::encode_upper(Sha256::digest(query.as_bytes()));

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(digest.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// 32 lowercase-hex chars from 16 random bytes.
    fn generate_nonce() -> String {
        let bytes: [u8; NONCE_BYTES] = rand::rng().random();
        hex::encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), "BTC/USDT".to_string());
        params.insert("side".to_string(), "BUY".to_string());
        params.insert("quantity".to_string(), "0.004".to_string());
        params
    }

    #[test]
    fn test_injects_nonce_and_method() {
        let signed = RequestSigner::new().sign(base_params(), "secret");

        let nonce = signed.params.get(NONCE_KEY).unwrap();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(signed.params.get(SIGN_METHOD_KEY).unwrap(), SIGN_METHOD);

        // HMAC-SHA256 output is 32 bytes, lowercase hex.
        assert_eq!(signed.signature.len(), 64);
        assert!(
            signed
                .signature
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        );
    }

    #[test]
    fn test_caller_supplied_nonce_is_preserved() {
        let mut params = base_params();
        params.insert(NONCE_KEY.to_string(), "a".repeat(32));

        let signed = RequestSigner::new().sign(params, "secret");
        assert_eq!(signed.params.get(NONCE_KEY).unwrap(), &"a".repeat(32));
    }

    #[test]
    fn test_signature_is_reproducible() {
        // Same params (nonce pinned) + same secret => same signature.
        let mut params = base_params();
        params.insert(NONCE_KEY.to_string(), "0".repeat(32));

        let signer = RequestSigner::new();
        let first = signer.sign(params.clone(), "secret");
        let second = signer.sign(params, "secret");
        assert_eq!(first.signature, second.signature);
    }

    #[test]
    fn test_fresh_nonce_changes_signature() {
        let signer = RequestSigner::new();
        let first = signer.sign(base_params(), "secret");
        let second = signer.sign(base_params(), "secret");

        assert_ne!(
            first.params.get(NONCE_KEY),
            second.params.get(NONCE_KEY)
        );
        assert_ne!(first.signature, second.signature);
    }

    #[test]
    fn test_any_param_or_secret_change_changes_signature() {
        let mut params = base_params();
        params.insert(NONCE_KEY.to_string(), "0".repeat(32));
        let signer = RequestSigner::new();
        let baseline = signer.sign(params.clone(), "secret");

        let mut tweaked = params.clone();
        tweaked.insert("quantity".to_string(), "0.005".to_string());
        assert_ne!(signer.sign(tweaked, "secret").signature, baseline.signature);

        assert_ne!(
            signer.sign(params, "other-secret").signature,
            baseline.signature
        );
    }

    #[test]
    fn test_serialization_independent_of_insertion_order() {
        let mut forward = BTreeMap::new();
        forward.insert("alpha".to_string(), "1".to_string());
        forward.insert("beta".to_string(), "2".to_string());
        forward.insert(NONCE_KEY.to_string(), "f".repeat(32));

        let mut reversed = BTreeMap::new();
        reversed.insert(NONCE_KEY.to_string(), "f".repeat(32));
        reversed.insert("beta".to_string(), "2".to_string());
        reversed.insert("alpha".to_string(), "1".to_string());

        let signer = RequestSigner::new();
        assert_eq!(
            signer.sign(forward, "secret").signature,
            signer.sign(reversed, "secret").signature
        );
    }

    #[test]
    fn test_two_layer_construction() {
        // The signature covers the uppercase-hex digest of the query,
        // not the raw query itself.
        let mut params = BTreeMap::new();
        params.insert("a".to_string(), "1".to_string());
        params.insert(NONCE_KEY.to_string(), "0".repeat(32));
        params.insert(SIGN_METHOD_KEY.to_string(), SIGN_METHOD.to_string());

        let query = RequestSigner::canonical_query(&params);
        assert_eq!(
            query,
            format!("a=1&nonce={}&sign_method=HmacSHA256", "0".repeat(32))
        );

        let digest = hex::encode_upper(Sha256::digest(query.as_bytes()));
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(digest.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        let signed = RequestSigner::new().sign(params, "secret");
        assert_eq!(signed.signature, expected);
    }
}
