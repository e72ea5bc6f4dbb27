//! Node identity: an ed25519 keypair whose public key names the peer.

use crate::error::{WireError, WireResult};
use crate::registry::PeerId;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Domain separator prepended to every handshake nonce before signing.
const HANDSHAKE_CONTEXT: &[u8] = b"peerlink-handshake-v1";

/// A node's signing key.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load a keypair from a 64-character hex secret.
    pub fn from_hex(secret: &str) -> WireResult<Self> {
        let bytes = hex::decode(secret.trim())
            .map(Zeroizing::new)
            .map_err(|e| WireError::InvalidKey(format!("secret is not hex: {e}")))?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            WireError::InvalidKey(format!(
                "secret must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        let bytes = Zeroizing::new(bytes);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    /// Hex-encoded secret, suitable for `p2p.secret`.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing_key.to_bytes()))
    }

    /// The identity other peers know this node by.
    pub fn peer_id(&self) -> PeerId {
        peer_id_from_public_key(&self.public_key())
    }

    pub(crate) fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a handshake challenge.
    pub(crate) fn sign_challenge(&self, nonce: &[u8]) -> [u8; 64] {
        self.signing_key.sign(&challenge(nonce)).to_bytes()
    }
}

/// Peer IDs are the lowercase hex of the ed25519 public key.
pub(crate) fn peer_id_from_public_key(public_key: &[u8; 32]) -> PeerId {
    PeerId::new(hex::encode(public_key))
}

/// Check that `public_key` belongs to `expected` and signed `nonce`.
pub(crate) fn verify_challenge(
    expected: &PeerId,
    public_key: &[u8; 32],
    nonce: &[u8],
    signature: &[u8; 64],
) -> WireResult<()> {
    let presented = peer_id_from_public_key(public_key);
    if &presented != expected {
        return Err(WireError::HandshakeFailed(format!(
            "expected peer {expected}, remote presented {presented}"
        )));
    }
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| WireError::HandshakeFailed(format!("invalid public key: {e}")))?;
    let signature = Signature::from_bytes(signature);
    verifying_key
        .verify(&challenge(nonce), &signature)
        .map_err(|e| WireError::HandshakeFailed(format!("signature verification failed: {e}")))
}

fn challenge(nonce: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HANDSHAKE_CONTEXT.len() + nonce.len());
    msg.extend_from_slice(HANDSHAKE_CONTEXT);
    msg.extend_from_slice(nonce);
    msg
}
