// ferrite-crypto/src/signature.rs

use ed25519_dalek::{PublicKey, Signature, SignatureError, Verifier};

pub fn sign_message(keypair: &crate::keypair::FerriteKeyPair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), SignatureError> {
    public_key.verify(message, signature)
}

/// Verifies a signature from raw key/signature bytes as carried on the wire.
pub fn verify_detached(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), SignatureError> {
    let pubkey = PublicKey::from_bytes(public_key)?;
    let sig = Signature::from_bytes(signature)?;
    pubkey.verify(message, &sig)
}
