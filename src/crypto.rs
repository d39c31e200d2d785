// Ed25519 signing for verification credentials.
//
// Credential signatures are domain-separated: the claims payload is prefixed
// with a protocol tag before signing, so a signature produced here can never
// be confused with a signature the same key made over any other payload.

use ed25519_dalek::{Signer, SigningKey, Verifier};
use rand::rngs::OsRng;

pub use ed25519_dalek::{
    Signature, SignatureError, SigningKey as SecretKey, VerifyingKey as PublicKey,
};

/// Domain tag bound into every credential signature.
pub const CREDENTIAL_CONTEXT: &[u8] = b"presence-protocol/credential/v1";

/// Generates a fresh Ed25519 keypair for credential issuance.
pub fn generate_keypair() -> SecretKey {
    let mut csprng = OsRng;
    SigningKey::generate(&mut csprng)
}

/// Signs a credential payload under the protocol's domain tag.
pub fn sign_credential(payload: &[u8], secret_key: &SecretKey) -> Signature {
    secret_key.sign(&tagged(payload))
}

/// Verifies a domain-tagged credential signature.
pub fn verify_credential(payload: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    public_key.verify(&tagged(payload), signature).is_ok()
}

fn tagged(payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(CREDENTIAL_CONTEXT.len() + 1 + payload.len());
    message.extend_from_slice(CREDENTIAL_CONTEXT);
    message.push(0);
    message.extend_from_slice(payload);
    message
}
