//! The signing identity: one private key and its certificate chain.

use std::io::Read;
use std::sync::{Mutex, OnceLock, PoisonError};

use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::x509::X509;
use tracing::info;

use crate::error::{OverlayError, Result};
use crate::host::AssetSource;

/// Signature algorithm family of the identity's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

impl KeyAlgorithm {
    /// Extension of the v1 signature block file.
    pub fn block_extension(self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::Ec => "EC",
        }
    }

    /// v2 signature algorithm identifier (SHA-256 variants).
    pub fn v2_algorithm_id(self) -> u32 {
        match self {
            KeyAlgorithm::Rsa => 0x0103,
            KeyAlgorithm::Ec => 0x0201,
        }
    }
}

/// Private key plus certificate chain, leaf first.
pub struct SigningIdentity {
    key: PKey<Private>,
    chain: Vec<X509>,
    algorithm: KeyAlgorithm,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("algorithm", &self.algorithm)
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

static SHARED: OnceLock<SigningIdentity> = OnceLock::new();
static LOADING: Mutex<()> = Mutex::new(());

impl SigningIdentity {
    /// Pair `key` with `chain`; the leaf certificate must hold `key`'s public half.
    pub fn new(key: PKey<Private>, chain: Vec<X509>) -> Result<Self> {
        let leaf = chain
            .first()
            .ok_or_else(|| OverlayError::signing("keystore holds no certificate"))?;
        if !leaf.public_key()?.public_eq(&key) {
            return Err(OverlayError::signing(
                "certificate does not match the private key",
            ));
        }
        let algorithm = match key.id() {
            Id::RSA => KeyAlgorithm::Rsa,
            Id::EC => KeyAlgorithm::Ec,
            other => {
                return Err(OverlayError::signing(format!(
                    "unsupported key type {other:?}, expected RSA or EC"
                )))
            }
        };
        Ok(Self {
            key,
            chain,
            algorithm,
        })
    }

    /// Load from a PKCS#12 keystore protected by `passphrase`.
    pub fn from_pkcs12(der: &[u8], passphrase: &str) -> Result<Self> {
        let parsed = Pkcs12::from_der(der)
            .and_then(|p12| p12.parse2(passphrase))
            .map_err(|e| OverlayError::signing(format!("cannot open keystore: {e}")))?;
        let key = parsed
            .pkey
            .ok_or_else(|| OverlayError::signing("keystore holds no private key"))?;
        let mut chain: Vec<X509> = parsed.cert.into_iter().collect();
        if let Some(ca) = parsed.ca {
            chain.extend(ca);
        }
        Self::new(key, chain)
    }

    /// Read the keystore asset and load it.
    pub fn load(assets: &dyn AssetSource, keystore: &str, passphrase: &str) -> Result<Self> {
        let mut der = Vec::new();
        assets
            .open(keystore)
            .and_then(|mut reader| reader.read_to_end(&mut der))
            .map_err(|e| OverlayError::asset(keystore, e))?;
        Self::from_pkcs12(&der, passphrase)
    }

    /// Process-wide identity, loaded from `keystore` on first use.
    ///
    /// Later calls return the identity loaded first, whatever keystore
    /// they name. A failed load leaves nothing cached.
    pub fn shared(
        assets: &dyn AssetSource,
        keystore: &str,
        passphrase: &str,
    ) -> Result<&'static SigningIdentity> {
        if let Some(identity) = SHARED.get() {
            return Ok(identity);
        }
        let _guard = LOADING.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(identity) = SHARED.get() {
            return Ok(identity);
        }
        let identity = Self::load(assets, keystore, passphrase)?;
        info!(keystore, algorithm = ?identity.algorithm, "loaded signing identity");
        Ok(SHARED.get_or_init(|| identity))
    }

    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }

    /// Leaf certificate.
    pub fn certificate(&self) -> &X509 {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Builder, X509NameBuilder};

    pub fn self_signed(key: PKey<Private>, common_name: &str) -> X509 {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", common_name).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(3650).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    pub fn rsa_key() -> PKey<Private> {
        PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
    }

    pub fn ec_key() -> PKey<Private> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
    }

    /// PKCS#12 keystore holding a fresh RSA identity.
    pub fn rsa_keystore(passphrase: &str) -> Vec<u8> {
        let key = rsa_key();
        let cert = self_signed(key.clone(), "Overlay Test");
        Pkcs12::builder()
            .name("key")
            .pkey(&key)
            .cert(&cert)
            .build2(passphrase)
            .unwrap()
            .to_der()
            .unwrap()
    }

    pub fn rsa_identity() -> SigningIdentity {
        SigningIdentity::from_pkcs12(&rsa_keystore("overlay"), "overlay").unwrap()
    }

    pub fn ec_identity() -> SigningIdentity {
        let key = ec_key();
        let cert = self_signed(key.clone(), "Overlay EC Test");
        SigningIdentity::new(key, vec![cert]).unwrap()
    }
}
