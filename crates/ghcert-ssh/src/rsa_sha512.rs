// ABOUTME: RSA CA signer that always produces rsa-sha2-512 signatures.
// ABOUTME: Rebuilds the RSA key from its primes and signs PKCS#1 v1.5 over SHA-512.

use crate::error::SigningError;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha512};
use ssh_key::private::RsaKeypair;
use ssh_key::public::KeyData;
use ssh_key::{Algorithm, HashAlg, Mpint, Signature};

/// Signs certificates for an RSA CA.
///
/// Certificates never carry legacy `ssh-rsa` (SHA-1) signatures; git hosts
/// reject them.
pub(crate) struct RsaSha512Signer {
    key: RsaPrivateKey,
    public: KeyData,
}

impl RsaSha512Signer {
    pub(crate) fn new(keypair: &RsaKeypair) -> Result<Self, SigningError> {
        let p = positive(&keypair.private.p, "p")?;
        let q = positive(&keypair.private.q, "q")?;
        let e = positive(&keypair.public.e, "e")?;
        let key = RsaPrivateKey::from_p_q(p, q, e)
            .map_err(|e| SigningError::InvalidKeyFormat(format!("RSA CA key: {e}")))?;
        Ok(Self {
            key,
            public: KeyData::Rsa(keypair.public.clone()),
        })
    }
}

fn positive(value: &Mpint, name: &str) -> Result<BigUint, SigningError> {
    value
        .as_positive_bytes()
        .map(BigUint::from_bytes_be)
        .ok_or_else(|| SigningError::InvalidKeyFormat(format!("RSA {name} is not positive")))
}

impl signature::Signer<Signature> for RsaSha512Signer {
    fn try_sign(&self, msg: &[u8]) -> Result<Signature, signature::Error> {
        let digest = Sha512::digest(msg);
        let bytes = self
            .key
            .sign(Pkcs1v15Sign::new::<Sha512>(), &digest)
            .map_err(|_| signature::Error::new())?;
        Signature::new(
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha512),
            },
            bytes,
        )
        .map_err(|_| signature::Error::new())
    }
}

impl ssh_key::SigningKey for RsaSha512Signer {
    fn public_key(&self) -> KeyData {
        self.public.clone()
    }
}
