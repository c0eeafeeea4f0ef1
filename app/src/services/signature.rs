// songforge_app/src/services/signature.rs

//! HMAC-SHA256 signatures on provider callbacks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Provider-Signature";

fn keyed(secret: &str, body: &[u8]) -> Option<HmacSha256> {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
  mac.update(body);
  Some(mac)
}

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
  keyed(secret, body).map(|mac| hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature header against `body`.
pub fn verify(secret: &str, body: &[u8], signature_hex: &str) -> bool {
  let Ok(expected) = hex::decode(signature_hex.trim()) else {
    return false;
  };
  keyed(secret, body).map_or(false, |mac| mac.verify_slice(&expected).is_ok())
}
