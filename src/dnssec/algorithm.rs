use std::fmt;

use ring::digest;

/// DNSSEC signing algorithm numbers (RFC 4034, 5155, 5702, 6605, 8080, 8624)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Algorithm {
    RsaMd5 = 1,
    DH = 2,
    Dsa = 3,
    RsaSha1 = 5,
    DsaNsec3Sha1 = 6,
    RsaSha1Nsec3Sha1 = 7,
    RsaSha256 = 8,
    RsaSha512 = 10,
    EccGost = 12,
    EcdsaP256Sha256 = 13,
    EcdsaP384Sha384 = 14,
    Ed25519 = 15,
    Ed448 = 16,
}

impl Algorithm {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::RsaMd5),
            2 => Some(Self::DH),
            3 => Some(Self::Dsa),
            5 => Some(Self::RsaSha1),
            6 => Some(Self::DsaNsec3Sha1),
            7 => Some(Self::RsaSha1Nsec3Sha1),
            8 => Some(Self::RsaSha256),
            10 => Some(Self::RsaSha512),
            12 => Some(Self::EccGost),
            13 => Some(Self::EcdsaP256Sha256),
            14 => Some(Self::EcdsaP384Sha384),
            15 => Some(Self::Ed25519),
            16 => Some(Self::Ed448),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Algorithms this validator can actually verify
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            Self::RsaSha1
                | Self::RsaSha1Nsec3Sha1
                | Self::RsaSha256
                | Self::RsaSha512
                | Self::EcdsaP256Sha256
                | Self::EcdsaP384Sha384
                | Self::Ed25519
        )
    }

    /// Recommended for validation per RFC 8624
    pub fn is_recommended(&self) -> bool {
        matches!(
            self,
            Self::RsaSha256 | Self::EcdsaP256Sha256 | Self::Ed25519
        )
    }
}

/// True if the raw algorithm number is one this validator can verify
pub fn algorithm_supported(value: u8) -> bool {
    Algorithm::from_u8(value).is_some_and(|a| a.is_supported())
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsaMd5 => write!(f, "RSAMD5"),
            Self::DH => write!(f, "DH"),
            Self::Dsa => write!(f, "DSA"),
            Self::RsaSha1 => write!(f, "RSASHA1"),
            Self::DsaNsec3Sha1 => write!(f, "DSA-NSEC3-SHA1"),
            Self::RsaSha1Nsec3Sha1 => write!(f, "RSASHA1-NSEC3-SHA1"),
            Self::RsaSha256 => write!(f, "RSASHA256"),
            Self::RsaSha512 => write!(f, "RSASHA512"),
            Self::EccGost => write!(f, "ECC-GOST"),
            Self::EcdsaP256Sha256 => write!(f, "ECDSAP256SHA256"),
            Self::EcdsaP384Sha384 => write!(f, "ECDSAP384SHA384"),
            Self::Ed25519 => write!(f, "ED25519"),
            Self::Ed448 => write!(f, "ED448"),
        }
    }
}

/// DS digest types (RFC 4034, 4509, 6605)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DigestType {
    Sha1 = 1,
    Sha256 = 2,
    Gost94 = 3,
    Sha384 = 4,
}

impl DigestType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Sha1),
            2 => Some(Self::Sha256),
            3 => Some(Self::Gost94),
            4 => Some(Self::Sha384),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Sha1 | Self::Sha256 | Self::Sha384)
    }

    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Gost94 => 32,
            Self::Sha384 => 48,
        }
    }

    /// Digest `data` with this algorithm; `None` when unsupported
    pub fn digest(&self, data: &[u8]) -> Option<Vec<u8>> {
        let algorithm = match self {
            Self::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &digest::SHA256,
            Self::Sha384 => &digest::SHA384,
            Self::Gost94 => return None,
        };
        Some(digest::digest(algorithm, data).as_ref().to_vec())
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "SHA1"),
            Self::Sha256 => write!(f, "SHA256"),
            Self::Gost94 => write!(f, "GOST94"),
            Self::Sha384 => write!(f, "SHA384"),
        }
    }
}
