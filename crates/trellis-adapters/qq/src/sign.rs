//! Ed25519 signatures for the webhook callback protocol.
//!
//! The platform derives a deterministic Ed25519 keypair from the bot secret:
//! the seed is the secret repeated until it reaches 32 bytes, truncated.
//! Inbound callbacks are signed over `timestamp || body`; the handshake
//! (op 13) is answered by signing `event_ts || plain_token` with the same
//! key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};

/// Derives the 32-byte Ed25519 seed from a bot secret.
pub fn derive_seed(secret: &str) -> [u8; 32] {
    let mut seed = secret.as_bytes().to_vec();
    if seed.is_empty() {
        return [0u8; 32];
    }
    while seed.len() < 32 {
        seed.extend_from_within(..);
    }
    seed.truncate(32);
    seed.try_into().expect("truncated to exactly 32 bytes")
}

fn signing_key(secret: &str) -> SigningKey {
    SigningKey::from_bytes(&derive_seed(secret))
}

/// Verifies an inbound callback signature.
///
/// The signed message is `timestamp || body`; `signature_hex` comes from the
/// `X-Signature-Ed25519` header.
pub fn verify_signature(secret: &str, timestamp: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&signature_bytes) else {
        return false;
    };

    let mut message = timestamp.as_bytes().to_vec();
    message.extend_from_slice(body);

    signing_key(secret)
        .verifying_key()
        .verify(&message, &signature)
        .is_ok()
}

/// Signs the callback-URL verification challenge, returning the hex
/// signature over `event_ts || plain_token`.
pub fn sign_handshake(secret: &str, event_ts: &str, plain_token: &str) -> String {
    let mut message = event_ts.as_bytes().to_vec();
    message.extend_from_slice(plain_token.as_bytes());
    hex::encode(signing_key(secret).sign(&message).to_bytes())
}
