use super::enums::RecordType;
use super::name::Name;
use super::wire::{self, ParseError};

/// NSEC/NSEC3 type bitmap (RFC 4034 section 4.1.2), kept as a sorted list of
/// type codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeBitmap {
    types: Vec<u16>,
}

impl TypeBitmap {
    pub fn from_types(types: &[RecordType]) -> Self {
        let mut codes: Vec<u16> = types.iter().map(|t| (*t).into()).collect();
        codes.sort_unstable();
        codes.dedup();
        TypeBitmap { types: codes }
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut types = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            if pos + 2 > data.len() {
                return Err(ParseError::TruncatedRdata);
            }
            let window = data[pos] as u16;
            let len = data[pos + 1] as usize;
            pos += 2;
            if len == 0 || len > 32 || pos + len > data.len() {
                return Err(ParseError::TruncatedRdata);
            }
            for (i, byte) in data[pos..pos + len].iter().enumerate() {
                for bit in 0..8 {
                    if byte & (0x80 >> bit) != 0 {
                        types.push(window * 256 + (i as u16) * 8 + bit as u16);
                    }
                }
            }
            pos += len;
        }
        Ok(TypeBitmap { types })
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut sorted = self.types.clone();
        sorted.sort_unstable();
        let mut idx = 0;
        while idx < sorted.len() {
            let window = sorted[idx] / 256;
            let mut bits = [0u8; 32];
            let mut max_byte = 0;
            while idx < sorted.len() && sorted[idx] / 256 == window {
                let offset = (sorted[idx] % 256) as usize;
                bits[offset / 8] |= 0x80 >> (offset % 8);
                max_byte = offset / 8;
                idx += 1;
            }
            out.push(window as u8);
            out.push((max_byte + 1) as u8);
            out.extend_from_slice(&bits[..=max_byte]);
        }
        out
    }

    pub fn contains(&self, rtype: RecordType) -> bool {
        self.types.contains(&rtype.into())
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// RRSIG RDATA (RFC 4034 section 3.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RrsigRdata {
    pub type_covered: RecordType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer: Name,
    pub signature: Vec<u8>,
}

impl RrsigRdata {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 18 {
            return Err(ParseError::InvalidRdata("RRSIG"));
        }
        let type_covered = u16::from_be_bytes([data[0], data[1]]).into();
        let algorithm = data[2];
        let labels = data[3];
        let original_ttl = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let expiration = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let inception = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
        let key_tag = u16::from_be_bytes([data[16], data[17]]);
        // Signer name is never compressed inside RRSIG RDATA
        let (signer_labels, after_name) = wire::parse_name_at(data, 18)?;
        let signer = Name::from_labels(signer_labels)?;
        let signature = data[after_name..].to_vec();
        Ok(RrsigRdata {
            type_covered,
            algorithm,
            labels,
            original_ttl,
            expiration,
            inception,
            key_tag,
            signer,
            signature,
        })
    }

    pub fn to_rdata(&self) -> Vec<u8> {
        let mut out = self.rdata_without_signature(false);
        out.extend_from_slice(&self.signature);
        out
    }

    /// The RRSIG RDATA up to and excluding the signature field. With
    /// `canonical` the signer name is lowercased, as required for the
    /// signed-data form.
    pub fn rdata_without_signature(&self, canonical: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(18 + self.signer.label_count() * 8);
        out.extend_from_slice(&u16::from(self.type_covered).to_be_bytes());
        out.push(self.algorithm);
        out.push(self.labels);
        out.extend_from_slice(&self.original_ttl.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&self.inception.to_be_bytes());
        out.extend_from_slice(&self.key_tag.to_be_bytes());
        if canonical {
            out.extend_from_slice(&self.signer.canonical_wire());
        } else {
            out.extend_from_slice(&self.signer.wire());
        }
        out
    }
}

/// DNSKEY RDATA (RFC 4034 section 2.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnskeyRdata {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
}

impl DnskeyRdata {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 4 {
            return Err(ParseError::InvalidRdata("DNSKEY"));
        }
        Ok(DnskeyRdata {
            flags: u16::from_be_bytes([data[0], data[1]]),
            protocol: data[2],
            algorithm: data[3],
            public_key: data[4..].to_vec(),
        })
    }

    pub fn to_rdata(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.public_key.len());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.push(self.protocol);
        out.push(self.algorithm);
        out.extend_from_slice(&self.public_key);
        out
    }

    /// Zone Key flag (bit 7)
    pub fn is_zone_key(&self) -> bool {
        self.flags & 0x0100 != 0
    }

    /// Secure Entry Point flag (bit 15)
    pub fn is_sep(&self) -> bool {
        self.flags & 0x0001 != 0
    }

    /// Revoked flag (RFC 5011)
    pub fn is_revoked(&self) -> bool {
        self.flags & 0x0080 != 0
    }

    /// Key tag per RFC 4034 Appendix B, including the RSAMD5 special case
    pub fn key_tag(&self) -> u16 {
        if self.algorithm == 1 {
            let key = &self.public_key;
            if key.len() >= 2 {
                return u16::from_be_bytes([key[key.len() - 2], key[key.len() - 1]]);
            }
            return 0;
        }

        let rdata = self.to_rdata();
        let mut accumulator: u32 = 0;
        for (i, &byte) in rdata.iter().enumerate() {
            if i % 2 == 0 {
                accumulator += u32::from(byte) << 8;
            } else {
                accumulator += u32::from(byte);
            }
        }
        accumulator += accumulator >> 16;
        (accumulator & 0xFFFF) as u16
    }

    /// Estimated key strength in bits, used for the NSEC3 iteration buckets.
    /// RSA keys carry an RFC 3110 exponent-length prefix before the modulus.
    pub fn key_size_bits(&self) -> usize {
        match self.algorithm {
            1 | 5 | 7 | 8 | 10 => {
                let key = &self.public_key;
                if key.is_empty() {
                    return 0;
                }
                let (exp_len, exp_start) = if key[0] == 0 {
                    if key.len() < 3 {
                        return 0;
                    }
                    (u16::from_be_bytes([key[1], key[2]]) as usize, 3)
                } else {
                    (key[0] as usize, 1)
                };
                key.len().saturating_sub(exp_start + exp_len) * 8
            }
            13 => 256,
            14 => 384,
            15 => 256,
            16 => 456,
            _ => self.public_key.len() * 8,
        }
    }
}

/// DS RDATA (RFC 4034 section 5.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsRdata {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

impl DsRdata {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 4 {
            return Err(ParseError::InvalidRdata("DS"));
        }
        Ok(DsRdata {
            key_tag: u16::from_be_bytes([data[0], data[1]]),
            algorithm: data[2],
            digest_type: data[3],
            digest: data[4..].to_vec(),
        })
    }

    pub fn to_rdata(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.digest.len());
        out.extend_from_slice(&self.key_tag.to_be_bytes());
        out.push(self.algorithm);
        out.push(self.digest_type);
        out.extend_from_slice(&self.digest);
        out
    }
}

/// NSEC RDATA (RFC 4034 section 4.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsecRdata {
    pub next: Name,
    pub types: TypeBitmap,
}

impl NsecRdata {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let (next_labels, after_name) = wire::parse_name_at(data, 0)?;
        let next = Name::from_labels(next_labels)?;
        let types = TypeBitmap::parse(&data[after_name..])?;
        Ok(NsecRdata { next, types })
    }

    pub fn to_rdata(&self) -> Vec<u8> {
        let mut out = self.next.wire();
        out.extend_from_slice(&self.types.to_wire());
        out
    }
}

/// NSEC3 RDATA (RFC 5155 section 3.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3Rdata {
    pub hash_algorithm: u8,
    pub flags: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
    pub next_hashed: Vec<u8>,
    pub types: TypeBitmap,
}

impl Nsec3Rdata {
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 5 {
            return Err(ParseError::InvalidRdata("NSEC3"));
        }
        let hash_algorithm = data[0];
        let flags = data[1];
        let iterations = u16::from_be_bytes([data[2], data[3]]);
        let salt_len = data[4] as usize;
        let salt_end = 5 + salt_len;
        if data.len() < salt_end + 1 {
            return Err(ParseError::InvalidRdata("NSEC3"));
        }
        let salt = data[5..salt_end].to_vec();
        let hash_len = data[salt_end] as usize;
        let hash_end = salt_end + 1 + hash_len;
        if hash_len == 0 || data.len() < hash_end {
            return Err(ParseError::InvalidRdata("NSEC3"));
        }
        let next_hashed = data[salt_end + 1..hash_end].to_vec();
        let types = TypeBitmap::parse(&data[hash_end..])?;
        Ok(Nsec3Rdata {
            hash_algorithm,
            flags,
            iterations,
            salt,
            next_hashed,
            types,
        })
    }

    pub fn to_rdata(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.hash_algorithm);
        out.push(self.flags);
        out.extend_from_slice(&self.iterations.to_be_bytes());
        out.push(self.salt.len() as u8);
        out.extend_from_slice(&self.salt);
        out.push(self.next_hashed.len() as u8);
        out.extend_from_slice(&self.next_hashed);
        out.extend_from_slice(&self.types.to_wire());
        out
    }

    /// Opt-Out flag (RFC 5155 section 3.1.2)
    pub fn opt_out(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_round_trip() {
        let bitmap = TypeBitmap::from_types(&[
            RecordType::A,
            RecordType::NS,
            RecordType::SOA,
            RecordType::RRSIG,
            RecordType::NSEC,
            RecordType::DNSKEY,
        ]);
        let wire = bitmap.to_wire();
        let parsed = TypeBitmap::parse(&wire).unwrap();
        assert_eq!(parsed, bitmap);
        assert!(parsed.contains(RecordType::A));
        assert!(parsed.contains(RecordType::DNSKEY));
        assert!(!parsed.contains(RecordType::MX));
    }

    #[test]
    fn bitmap_high_window() {
        let bitmap = TypeBitmap::from_types(&[RecordType::A, RecordType::Unknown(1234)]);
        let parsed = TypeBitmap::parse(&bitmap.to_wire()).unwrap();
        assert!(parsed.contains(RecordType::Unknown(1234)));
        assert!(parsed.contains(RecordType::A));
    }

    #[test]
    fn empty_bitmap() {
        let bitmap = TypeBitmap::from_types(&[]);
        assert!(bitmap.is_empty());
        assert!(bitmap.to_wire().is_empty());
        assert!(TypeBitmap::parse(&[]).unwrap().is_empty());
    }

    #[test]
    fn rrsig_round_trip() {
        let rrsig = RrsigRdata {
            type_covered: RecordType::A,
            algorithm: 15,
            labels: 2,
            original_ttl: 3600,
            expiration: 1_700_086_400,
            inception: 1_700_000_000,
            key_tag: 12345,
            signer: Name::parse("example.com").unwrap(),
            signature: vec![0xAA; 64],
        };
        let parsed = RrsigRdata::parse(&rrsig.to_rdata()).unwrap();
        assert_eq!(parsed, rrsig);
    }

    #[test]
    fn dnskey_key_tag_rfc4034_vector() {
        // Test vector from RFC 4034 Appendix B.5
        let public_key = hex::decode(
            "030101a80020a95566ba42e886bb804cda84e47ef56dbd7aec612615552cec906d3e9b72dc4f90d3fc09b8e9d0ff2ae8ee5ed8cd61d7622c39ee2d76a2153bc0ac8b9e254125c46e0a224507fb358d7f6b5d7a42f75e60b9748e7c0747e2447f4bd7d10ca24bb1498de34a504406bbeb3b041fe48d0ad2b1de5adadb87d0c8824e7cc4dc3e5b7f0b3e8ac72c3d3d8aa7251abcaad82ad5ececed8cd83825d19ffd95e93bca729fdd88901b20fc598fb6a0779ddfa95e3e42ca9d0a7739d3c4ad3a7a5a30b3c60a73a6f09fdb812746e0d69edfba06754465f2e1dd5e3802e6d05bd6148e38fd8ca1632b71f6559fe9b6e18d73c5a750e3e2f2f205972e7b28ae04ddae5e27915a08d217db5ce090c119d23f79fb"
        ).unwrap();
        let key = DnskeyRdata {
            flags: 0x0101,
            protocol: 3,
            algorithm: 5,
            public_key,
        };
        assert_eq!(key.key_tag(), 55495);
    }

    #[test]
    fn dnskey_key_tag_rsamd5() {
        let key = DnskeyRdata {
            flags: 0x0101,
            protocol: 3,
            algorithm: 1,
            public_key: vec![0x12, 0x34, 0x56, 0x78],
        };
        assert_eq!(key.key_tag(), 0x5678);
    }

    #[test]
    fn dnskey_flags() {
        let key = DnskeyRdata {
            flags: 257,
            protocol: 3,
            algorithm: 8,
            public_key: vec![0x01],
        };
        assert!(key.is_zone_key());
        assert!(key.is_sep());
        assert!(!key.is_revoked());
    }

    #[test]
    fn dnskey_key_size_ed25519() {
        let key = DnskeyRdata {
            flags: 256,
            protocol: 3,
            algorithm: 15,
            public_key: vec![0u8; 32],
        };
        assert_eq!(key.key_size_bits(), 256);
    }

    #[test]
    fn dnskey_key_size_rsa() {
        // Short-form exponent length 3, 256-byte modulus
        let mut public_key = vec![3u8, 1, 0, 1];
        public_key.extend(vec![0xFF; 256]);
        let key = DnskeyRdata {
            flags: 256,
            protocol: 3,
            algorithm: 8,
            public_key,
        };
        assert_eq!(key.key_size_bits(), 2048);
    }

    #[test]
    fn nsec_round_trip() {
        let nsec = NsecRdata {
            next: Name::parse("beta.example.com").unwrap(),
            types: TypeBitmap::from_types(&[RecordType::A, RecordType::RRSIG, RecordType::NSEC]),
        };
        let parsed = NsecRdata::parse(&nsec.to_rdata()).unwrap();
        assert_eq!(parsed, nsec);
    }

    #[test]
    fn nsec3_round_trip() {
        let nsec3 = Nsec3Rdata {
            hash_algorithm: 1,
            flags: 1,
            iterations: 12,
            salt: vec![0xAA, 0xBB, 0xCC, 0xDD],
            next_hashed: vec![0x11; 20],
            types: TypeBitmap::from_types(&[RecordType::A, RecordType::RRSIG]),
        };
        let parsed = Nsec3Rdata::parse(&nsec3.to_rdata()).unwrap();
        assert_eq!(parsed, nsec3);
        assert!(parsed.opt_out());
    }
}
