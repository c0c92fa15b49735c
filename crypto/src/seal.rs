//! Hybrid encryption of a payload for a single recipient.
//!
//! A fresh ephemeral key is generated for every sealed payload. The ephemeral key and the
//! recipient's [PublicKey] perform an ECDH key agreement and the shared secret is expanded with
//! HKDF-SHA256 into a ChaCha20-Poly1305 key. The salt binds the namespace and both public keys so
//! a payload sealed for one recipient (or one application) cannot be opened as another.
//!
//! Layout of a sealed payload: `ephemeral public key (33) || ciphertext || tag (16)`.

use crate::{
    public_key,
    secp256r1::{point, scalar, PUBLIC_KEY_LENGTH},
    Error, PrivateKey, PrivateKeyExt, PublicKey, Signer,
};
use chacha20poly1305::{
    aead::{Aead, AeadCore},
    ChaCha20Poly1305, KeyInit, KeySizeUser,
};
use commonware_cryptography::{Hasher, Sha256};
use commonware_utils::union_unique;
use hkdf::{hmac::digest::typenum::Unsigned, Hkdf};
use p256::ecdh::diffie_hellman;
use rand::{CryptoRng, Rng};
use zeroize::Zeroizing;

/// The size of the key used by the ChaCha20Poly1305 cipher.
const CHACHA_KEY_SIZE: usize = <ChaCha20Poly1305 as KeySizeUser>::KeySize::USIZE;

/// The size of the authentication tag appended by the ChaCha20Poly1305 cipher.
const TAG_SIZE: usize = <ChaCha20Poly1305 as AeadCore>::TagSize::USIZE;

/// Number of bytes a sealed payload adds to its plaintext.
pub const SEAL_OVERHEAD: usize = PUBLIC_KEY_LENGTH + TAG_SIZE;

/// Prefix of the HKDF salt.
const KDF_PREFIX: &[u8] = b"fastchain-crypto/SEAL/v1/";

/// HKDF info for the payload key.
const KDF_INFO: &[u8] = b"payload";

/// Derive the cipher for a sealed payload.
fn derive(
    shared: &[u8],
    namespace: &[u8],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<ChaCha20Poly1305, Error> {
    let mut hasher = Sha256::new();
    hasher.update(KDF_PREFIX);
    hasher.update(&union_unique(namespace, ephemeral));
    hasher.update(recipient);
    let salt = hasher.finalize();

    let prk = Hkdf::<sha2::Sha256>::new(Some(salt.as_ref()), shared);
    let mut key = Zeroizing::new([0u8; CHACHA_KEY_SIZE]);
    prk.expand(KDF_INFO, &mut key[..])
        .map_err(|_| Error::KeyDerivation)?;
    ChaCha20Poly1305::new_from_slice(&key[..]).map_err(|_| Error::KeyDerivation)
}

/// Encrypt `plaintext` so that only the holder of the private key for `recipient` can read it.
pub fn seal<R: Rng + CryptoRng>(
    rng: &mut R,
    recipient: &PublicKey,
    namespace: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, Error> {
    let ephemeral = PrivateKey::from_rng(rng);
    let ephemeral_public = ephemeral.public_key();
    let shared = diffie_hellman(scalar(&ephemeral)?, point(recipient));
    let cipher = derive(
        shared.raw_secret_bytes(),
        namespace,
        &ephemeral_public,
        recipient,
    )?;

    // Every payload is sealed under a fresh key, so the nonce never repeats for a given key.
    let nonce = Default::default();
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Encryption)?;

    let mut sealed = Vec::with_capacity(PUBLIC_KEY_LENGTH + ciphertext.len());
    sealed.extend_from_slice(&ephemeral_public);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a payload produced by [seal] for the public key of `recipient`.
///
/// Returns [Error::Decryption] if the payload was sealed for someone else, under a different
/// namespace, or was modified.
pub fn open(recipient: &PrivateKey, namespace: &[u8], sealed: &[u8]) -> Result<Vec<u8>, Error> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(Error::InvalidLength(SEAL_OVERHEAD, sealed.len()));
    }
    let (ephemeral, ciphertext) = sealed.split_at(PUBLIC_KEY_LENGTH);
    let ephemeral = public_key(ephemeral)?;
    let shared = diffie_hellman(scalar(recipient)?, point(&ephemeral));
    let cipher = derive(
        shared.raw_secret_bytes(),
        namespace,
        &ephemeral,
        &recipient.public_key(),
    )?;
    let nonce = Default::default();
    cipher
        .decrypt(&nonce, ciphertext)
        .map_err(|_| Error::Decryption)
}
