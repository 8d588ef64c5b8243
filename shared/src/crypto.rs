//! Verificação de assinaturas para o motor de scripts
//!
//! O tipo de assinatura é selecionado por um byte anexado ao final da
//! assinatura empilhada: ECDSA sobre secp256k1, Ed25519 ou Schnorr sobre
//! secp256k1. O nó só verifica; as funções de assinatura existem para os
//! testes e para o harness de simnet.

use ed25519_dalek::Verifier;
use secp256k1::{Message, Secp256k1};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{ChainError, Hash256};

/// Algoritmos de assinatura suportados
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    EcdsaSecp256k1 = 0,
    Ed25519 = 1,
    SchnorrSecp256k1 = 2,
}

impl TryFrom<u8> for SignatureAlgorithm {
    type Error = ChainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::EcdsaSecp256k1),
            1 => Ok(Self::Ed25519),
            2 => Ok(Self::SchnorrSecp256k1),
            other => Err(ChainError::UnknownSignatureAlgorithm(other)),
        }
    }
}

/// Chave pública serializada com o algoritmo correspondente
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    key_data: Vec<u8>,
    algorithm: SignatureAlgorithm,
}

impl PublicKey {
    /// Cria uma chave pública a partir de bytes
    ///
    /// # Errors
    ///
    /// Retorna erro se o tamanho não corresponder ao algoritmo
    pub fn from_bytes(bytes: Vec<u8>, algorithm: SignatureAlgorithm) -> Result<Self, ChainError> {
        let expected = match algorithm {
            SignatureAlgorithm::EcdsaSecp256k1 => 33,
            SignatureAlgorithm::Ed25519 | SignatureAlgorithm::SchnorrSecp256k1 => 32,
        };
        if bytes.len() != expected {
            return Err(ChainError::InvalidKeySize {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            key_data: bytes,
            algorithm,
        })
    }

    /// Returns the raw bytes of the public key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    /// Returns the signature algorithm used by this key
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }
}

/// Chave privada; zerada ao sair de escopo
#[derive(Debug, Clone)]
pub struct PrivateKey {
    key_data: Vec<u8>,
    algorithm: SignatureAlgorithm,
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.key_data.zeroize();
    }
}

impl PrivateKey {
    /// Creates a `PrivateKey` from raw bytes (32 bytes for every algorithm)
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are invalid for the algorithm
    pub fn from_bytes(bytes: Vec<u8>, algorithm: SignatureAlgorithm) -> Result<Self, ChainError> {
        if bytes.len() != 32 {
            return Err(ChainError::InvalidKeySize {
                expected: 32,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            key_data: bytes,
            algorithm,
        })
    }

    /// Returns the raw bytes of the private key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key_data
    }

    /// Returns the signature algorithm used by this key
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }
}

/// Par de chaves usado pelos testes e pelo harness de simnet
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Generates a fresh keypair for the given algorithm
    ///
    /// # Errors
    ///
    /// Returns error if key generation fails
    pub fn generate(algorithm: SignatureAlgorithm) -> Result<Self, ChainError> {
        match algorithm {
            SignatureAlgorithm::EcdsaSecp256k1 | SignatureAlgorithm::SchnorrSecp256k1 => {
                let secp = Secp256k1::new();
                let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
                let public_bytes = match algorithm {
                    SignatureAlgorithm::SchnorrSecp256k1 => {
                        let keypair = secp256k1::Keypair::from_secret_key(&secp, &secret);
                        keypair.x_only_public_key().0.serialize().to_vec()
                    }
                    _ => public.serialize().to_vec(),
                };
                Ok(Self {
                    public_key: PublicKey::from_bytes(public_bytes, algorithm)?,
                    private_key: PrivateKey::from_bytes(
                        secret.secret_bytes().to_vec(),
                        algorithm,
                    )?,
                })
            }
            SignatureAlgorithm::Ed25519 => {
                let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
                Ok(Self {
                    public_key: PublicKey::from_bytes(
                        signing.verifying_key().to_bytes().to_vec(),
                        algorithm,
                    )?,
                    private_key: PrivateKey::from_bytes(signing.to_bytes().to_vec(), algorithm)?,
                })
            }
        }
    }
}

/// Assina o hash de 32 bytes de uma transação
///
/// # Errors
///
/// Retorna erro se a chave for inválida para o algoritmo
pub fn sign_hash(private_key: &PrivateKey, digest: &Hash256) -> Result<Vec<u8>, ChainError> {
    match private_key.algorithm() {
        SignatureAlgorithm::EcdsaSecp256k1 => {
            let secp = Secp256k1::new();
            let secret = secp256k1::SecretKey::from_slice(private_key.as_bytes())
                .map_err(|e| ChainError::CryptographicError(e.to_string()))?;
            let msg = Message::from_digest(*digest.as_bytes());
            Ok(secp.sign_ecdsa(&msg, &secret).serialize_compact().to_vec())
        }
        SignatureAlgorithm::Ed25519 => {
            use ed25519_dalek::Signer;
            let bytes: [u8; 32] = private_key
                .as_bytes()
                .try_into()
                .map_err(|_| ChainError::InvalidKeySize {
                    expected: 32,
                    actual: private_key.as_bytes().len(),
                })?;
            let signing = ed25519_dalek::SigningKey::from_bytes(&bytes);
            Ok(signing.sign(digest.as_bytes()).to_bytes().to_vec())
        }
        SignatureAlgorithm::SchnorrSecp256k1 => {
            let secp = Secp256k1::new();
            let secret = secp256k1::SecretKey::from_slice(private_key.as_bytes())
                .map_err(|e| ChainError::CryptographicError(e.to_string()))?;
            let keypair = secp256k1::Keypair::from_secret_key(&secp, &secret);
            let msg = Message::from_digest(*digest.as_bytes());
            Ok(secp
                .sign_schnorr_no_aux_rand(&msg, &keypair)
                .as_ref()
                .to_vec())
        }
    }
}

/// Verifica uma assinatura sobre o hash de 32 bytes de uma transação
///
/// Falha de verificação devolve `Ok(false)`; bytes malformados devolvem
/// `Ok(false)` também, pois para o consenso ambos significam o mesmo.
///
/// # Errors
///
/// Nunca retorna erro hoje; a assinatura `Result` preserva a forma das
/// demais operações criptográficas.
pub fn verify_hash(
    algorithm: SignatureAlgorithm,
    public_key: &[u8],
    digest: &Hash256,
    signature: &[u8],
) -> Result<bool, ChainError> {
    let ok = match algorithm {
        SignatureAlgorithm::EcdsaSecp256k1 => {
            let secp = Secp256k1::verification_only();
            let (Ok(pk), Ok(sig)) = (
                secp256k1::PublicKey::from_slice(public_key),
                secp256k1::ecdsa::Signature::from_compact(signature),
            ) else {
                return Ok(false);
            };
            let msg = Message::from_digest(*digest.as_bytes());
            secp.verify_ecdsa(&msg, &sig, &pk).is_ok()
        }
        SignatureAlgorithm::Ed25519 => {
            let (Ok(pk_bytes), Ok(sig_bytes)) = (
                <[u8; 32]>::try_from(public_key),
                <[u8; 64]>::try_from(signature),
            ) else {
                return Ok(false);
            };
            let Ok(vk) = ed25519_dalek::VerifyingKey::from_bytes(&pk_bytes) else {
                return Ok(false);
            };
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            vk.verify(digest.as_bytes(), &sig).is_ok()
        }
        SignatureAlgorithm::SchnorrSecp256k1 => {
            let secp = Secp256k1::verification_only();
            let (Ok(pk), Ok(sig)) = (
                secp256k1::XOnlyPublicKey::from_slice(public_key),
                secp256k1::schnorr::Signature::from_slice(signature),
            ) else {
                return Ok(false);
            };
            let msg = Message::from_digest(*digest.as_bytes());
            secp.verify_schnorr(&sig, &msg, &pk).is_ok()
        }
    };
    Ok(ok)
}
