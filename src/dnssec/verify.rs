use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ring::signature;
use tracing::{debug, trace};

use crate::config::ValidatorConfig;
use crate::dns::{DnskeyRdata, RrsigRdata};

use super::algorithm::{algorithm_supported, Algorithm};
use super::canonical::signed_data;
use super::message::{SRRset, SecurityStatus};
use super::CancelToken;

/// Why a single RRSIG check failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Signer is not a suffix of the owner, or differs from the key owner
    SignerMismatch,
    Expired,
    NotYetValid,
    /// RRSIG label count exceeds the owner label count
    LabelCountInvalid,
    UnsupportedAlgorithm(u8),
    /// No DNSKEY with a matching tag and algorithm
    KeyMismatch,
    InvalidKey,
    SignatureInvalid,
    /// The per-response verification budget ran out
    BudgetExceeded,
    Cancelled,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignerMismatch => write!(f, "RRSIG signer does not match"),
            Self::Expired => write!(f, "signature has expired"),
            Self::NotYetValid => write!(f, "signature is not yet valid"),
            Self::LabelCountInvalid => write!(f, "RRSIG label count is invalid"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm: {}", alg),
            Self::KeyMismatch => write!(f, "no DNSKEY matches the signature"),
            Self::InvalidKey => write!(f, "malformed DNSKEY"),
            Self::SignatureInvalid => write!(f, "cryptographic verification failed"),
            Self::BudgetExceeded => write!(f, "signature verification budget exceeded"),
            Self::Cancelled => write!(f, "validation cancelled"),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Per-response cap on cryptographic verifications, a guard against
/// responses crafted to burn CPU
#[derive(Debug)]
pub struct SigBudget {
    remaining: usize,
}

impl SigBudget {
    pub fn new(limit: usize) -> Self {
        SigBudget { remaining: limit }
    }

    pub fn consume(&mut self) -> Result<(), VerifyError> {
        if self.remaining == 0 {
            return Err(VerifyError::BudgetExceeded);
        }
        self.remaining -= 1;
        Ok(())
    }
}

/// RFC 1982 serial comparison on 32-bit timestamps: `a` is before `b`
fn serial_lt(a: u32, b: u32) -> bool {
    let distance = b.wrapping_sub(a);
    distance != 0 && distance < 0x8000_0000
}

/// Check `now` against the RRSIG validity window with symmetric clock skew
pub fn check_validity_window(
    now: u32,
    inception: u32,
    expiration: u32,
    skew: u32,
) -> Result<(), VerifyError> {
    if serial_lt(now, inception.wrapping_sub(skew)) {
        return Err(VerifyError::NotYetValid);
    }
    if serial_lt(expiration.wrapping_add(skew), now) {
        return Err(VerifyError::Expired);
    }
    Ok(())
}

/// Verifies RRSIGs over RRsets under DNSKEY sets
#[derive(Debug, Clone)]
pub struct RrsetVerifier {
    clock_skew: u32,
    current_time: Option<u32>,
}

impl RrsetVerifier {
    pub fn new(config: &ValidatorConfig) -> Self {
        RrsetVerifier {
            clock_skew: config.clock_skew.as_secs() as u32,
            current_time: None,
        }
    }

    /// Pin the clock for testing
    pub fn set_current_time(&mut self, time: u32) {
        self.current_time = Some(time);
    }

    fn now(&self) -> u32 {
        self.current_time.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0)
        })
    }

    /// Verify an RRset against a DNSKEY set and stamp its verdict. SECURE if
    /// at least one RRSIG verifies under at least one key.
    pub fn verify_rrset(
        &self,
        rrset: &mut SRRset,
        keys: &SRRset,
        budget: &mut SigBudget,
        cancel: &CancelToken,
    ) -> SecurityStatus {
        let status = self.verify_with_keys(rrset, keys, None, budget, cancel);
        rrset.set_security(status.0);
        if let Some(source) = status.1 {
            rrset.set_wildcard_source(source);
        }
        status.0
    }

    /// Like `verify_rrset` but only signatures made by `key` count. Used for
    /// the DNSKEY self-signing check, where the signing key must be one the
    /// parent's DS set vouched for.
    pub fn verify_rrset_with_key(
        &self,
        rrset: &mut SRRset,
        keys: &SRRset,
        key: &DnskeyRdata,
        budget: &mut SigBudget,
        cancel: &CancelToken,
    ) -> SecurityStatus {
        let status = self.verify_with_keys(rrset, keys, Some(key), budget, cancel);
        rrset.set_security(status.0);
        status.0
    }

    fn verify_with_keys(
        &self,
        rrset: &SRRset,
        keys: &SRRset,
        only_key: Option<&DnskeyRdata>,
        budget: &mut SigBudget,
        cancel: &CancelToken,
    ) -> (SecurityStatus, Option<crate::dns::Name>) {
        let sigs = rrset.rrsigs();
        if sigs.is_empty() {
            debug!(owner = %rrset.name(), rtype = %rrset.rtype(), "RRset has no signatures");
            return (SecurityStatus::Bogus, None);
        }

        let mut last_error = VerifyError::KeyMismatch;
        for rrsig in &sigs {
            match self.check_one(rrset, rrsig, keys, only_key, budget, cancel) {
                Ok(()) => {
                    trace!(owner = %rrset.name(), signer = %rrsig.signer, "RRSIG verified");
                    let wildcard = self.wildcard_source(rrset, rrsig);
                    return (SecurityStatus::Secure, wildcard);
                }
                Err(err) => {
                    trace!(owner = %rrset.name(), %err, "RRSIG rejected");
                    last_error = err;
                }
            }
        }
        debug!(owner = %rrset.name(), rtype = %rrset.rtype(), %last_error, "RRset is bogus");
        (SecurityStatus::Bogus, None)
    }

    /// The unexpanded wildcard the RRSIG proves this RRset came from, if
    /// its label count shows synthesis
    fn wildcard_source(&self, rrset: &SRRset, rrsig: &RrsigRdata) -> Option<crate::dns::Name> {
        let owner_labels = rrset.name().label_count();
        if (rrsig.labels as usize) < owner_labels {
            Some(rrset.name().suffix(rrsig.labels as usize).to_wildcard())
        } else {
            None
        }
    }

    /// The ordered per-signature checks; the first failure is the reason
    fn check_one(
        &self,
        rrset: &SRRset,
        rrsig: &RrsigRdata,
        keys: &SRRset,
        only_key: Option<&DnskeyRdata>,
        budget: &mut SigBudget,
        cancel: &CancelToken,
    ) -> Result<(), VerifyError> {
        // 1. Signer must sit above the owner and match the key set's owner
        if !rrset.name().is_subdomain_of(&rrsig.signer) || keys.name() != &rrsig.signer {
            return Err(VerifyError::SignerMismatch);
        }

        // 2. Validity window (RFC 1982 arithmetic, symmetric skew)
        check_validity_window(self.now(), rrsig.inception, rrsig.expiration, self.clock_skew)?;

        // 3. A label count above the owner's is nonsense
        if (rrsig.labels as usize) > rrset.name().label_count() {
            return Err(VerifyError::LabelCountInvalid);
        }

        // 4. Algorithm support and key selection by (tag, algorithm)
        if !algorithm_supported(rrsig.algorithm) {
            return Err(VerifyError::UnsupportedAlgorithm(rrsig.algorithm));
        }

        let data = signed_data(rrset, rrsig);
        let mut last_error = VerifyError::KeyMismatch;
        for key_record in keys.records() {
            let Ok(key) = key_record.dnskey() else {
                continue;
            };
            if key.algorithm != rrsig.algorithm || key.key_tag() != rrsig.key_tag {
                continue;
            }
            if !key.is_zone_key() || key.is_revoked() {
                continue;
            }
            if let Some(required) = only_key {
                if required != &key {
                    continue;
                }
            }

            if cancel.is_cancelled() {
                return Err(VerifyError::Cancelled);
            }
            budget.consume()?;

            // 5. Cryptographic verification over the canonical form
            match verify_signature(&key, &data, &rrsig.signature) {
                Ok(()) => return Ok(()),
                Err(err) => last_error = err,
            }
        }
        Err(last_error)
    }
}

/// Dispatch one signature check to ring. DNSKEY wire formats differ from
/// ring's expectations: RSA keys carry an RFC 3110 exponent-length prefix,
/// ECDSA keys are the bare x||y point, Ed25519 keys are used as-is.
pub fn verify_signature(
    key: &DnskeyRdata,
    data: &[u8],
    sig: &[u8],
) -> Result<(), VerifyError> {
    let algorithm =
        Algorithm::from_u8(key.algorithm).ok_or(VerifyError::UnsupportedAlgorithm(key.algorithm))?;

    match algorithm {
        Algorithm::RsaSha1 | Algorithm::RsaSha1Nsec3Sha1 => verify_rsa(
            &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
            key,
            data,
            sig,
        ),
        Algorithm::RsaSha256 => {
            verify_rsa(&signature::RSA_PKCS1_2048_8192_SHA256, key, data, sig)
        }
        Algorithm::RsaSha512 => {
            verify_rsa(&signature::RSA_PKCS1_2048_8192_SHA512, key, data, sig)
        }
        Algorithm::EcdsaP256Sha256 => {
            verify_ecdsa(&signature::ECDSA_P256_SHA256_FIXED, key, data, sig, 64)
        }
        Algorithm::EcdsaP384Sha384 => {
            verify_ecdsa(&signature::ECDSA_P384_SHA384_FIXED, key, data, sig, 96)
        }
        Algorithm::Ed25519 => {
            if key.public_key.len() != 32 {
                return Err(VerifyError::InvalidKey);
            }
            signature::UnparsedPublicKey::new(&signature::ED25519, &key.public_key)
                .verify(data, sig)
                .map_err(|_| VerifyError::SignatureInvalid)
        }
        _ => Err(VerifyError::UnsupportedAlgorithm(key.algorithm)),
    }
}

fn verify_rsa(
    algorithm: &'static signature::RsaParameters,
    key: &DnskeyRdata,
    data: &[u8],
    sig: &[u8],
) -> Result<(), VerifyError> {
    let (exponent, modulus) = split_rsa_key(&key.public_key)?;
    signature::RsaPublicKeyComponents {
        n: modulus,
        e: exponent,
    }
    .verify(algorithm, data, sig)
    .map_err(|_| VerifyError::SignatureInvalid)
}

fn verify_ecdsa(
    algorithm: &'static signature::EcdsaVerificationAlgorithm,
    key: &DnskeyRdata,
    data: &[u8],
    sig: &[u8],
    point_len: usize,
) -> Result<(), VerifyError> {
    if key.public_key.len() != point_len {
        return Err(VerifyError::InvalidKey);
    }
    // ring wants the uncompressed-point prefix the DNSKEY format omits
    let mut point = Vec::with_capacity(point_len + 1);
    point.push(0x04);
    point.extend_from_slice(&key.public_key);
    signature::UnparsedPublicKey::new(algorithm, &point)
        .verify(data, sig)
        .map_err(|_| VerifyError::SignatureInvalid)
}

/// Split an RFC 3110 RSA key blob into (exponent, modulus)
fn split_rsa_key(key: &[u8]) -> Result<(&[u8], &[u8]), VerifyError> {
    if key.is_empty() {
        return Err(VerifyError::InvalidKey);
    }
    let (exp_len, exp_start) = if key[0] == 0 {
        if key.len() < 3 {
            return Err(VerifyError::InvalidKey);
        }
        (u16::from_be_bytes([key[1], key[2]]) as usize, 3)
    } else {
        (key[0] as usize, 1)
    };
    let exp_end = exp_start + exp_len;
    if exp_end >= key.len() {
        return Err(VerifyError::InvalidKey);
    }
    Ok((&key[exp_start..exp_end], &key[exp_end..]))
}
