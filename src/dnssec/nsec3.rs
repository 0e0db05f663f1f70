use std::fmt;

use ring::digest;
use tracing::{debug, trace};

use crate::config::ValidatorConfig;
use crate::dns::{Name, Nsec3Rdata, RecordType};

use super::nsec::NoDsProof;

/// NSEC3 hash algorithm number for SHA-1, the only one defined
const NSEC3_HASH_SHA1: u8 = 1;

/// Errors while assembling an NSEC3 record set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nsec3Error {
    NoRecords,
    /// The response mixes (algorithm, iterations, salt) parameter sets
    MixedParameters,
    UnsupportedHashAlgorithm(u8),
    /// An owner name's hash label does not decode as base32hex
    BadOwnerName,
}

impl fmt::Display for Nsec3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecords => write!(f, "no NSEC3 records"),
            Self::MixedParameters => write!(f, "mixed NSEC3 parameter sets"),
            Self::UnsupportedHashAlgorithm(alg) => {
                write!(f, "unsupported NSEC3 hash algorithm: {}", alg)
            }
            Self::BadOwnerName => write!(f, "NSEC3 owner name is not a valid hash label"),
        }
    }
}

impl std::error::Error for Nsec3Error {}

/// Three-way outcome of an NSEC3 proof
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nsec3Outcome {
    Secure,
    /// Proof rests on opt-out or exceeds the iteration ceiling
    Insecure,
    Bogus,
}

/// The per-zone NSEC3 parameters every record must share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nsec3Params {
    pub hash_algorithm: u8,
    pub iterations: u16,
    pub salt: Vec<u8>,
}

/// One NSEC3 record with its owner hash decoded
#[derive(Debug, Clone, PartialEq)]
pub struct Nsec3Entry {
    pub owner_hash: Vec<u8>,
    pub rdata: Nsec3Rdata,
}

/// All NSEC3 records of one response, normalized for proof checks
#[derive(Debug, Clone, PartialEq)]
pub struct Nsec3Set {
    pub zone: Name,
    pub params: Nsec3Params,
    entries: Vec<Nsec3Entry>,
}

/// Iterated SHA-1 over the canonical wire name and salt (RFC 5155
/// section 5)
pub fn hash_name(
    name: &Name,
    hash_algorithm: u8,
    iterations: u16,
    salt: &[u8],
) -> Result<Vec<u8>, Nsec3Error> {
    if hash_algorithm != NSEC3_HASH_SHA1 {
        return Err(Nsec3Error::UnsupportedHashAlgorithm(hash_algorithm));
    }

    let mut input = name.canonical_wire();
    input.extend_from_slice(salt);
    let mut hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &input)
        .as_ref()
        .to_vec();
    for _ in 0..iterations {
        let mut next = hash;
        next.extend_from_slice(salt);
        hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &next)
            .as_ref()
            .to_vec();
    }
    Ok(hash)
}

/// Base32hex encoding used for NSEC3 owner labels
pub fn encode_hash(hash: &[u8]) -> String {
    base32::encode(base32::Alphabet::Rfc4648HexLower { padding: false }, hash)
}

fn decode_hash_label(label: &str) -> Option<Vec<u8>> {
    base32::decode(
        base32::Alphabet::Rfc4648HexLower { padding: false },
        &label.to_ascii_lowercase(),
    )
}

/// Assemble a consistent NSEC3 set from verified authority records. Fails
/// on mixed parameters; skips records whose owner label is undecodable only
/// if others remain, since an attacker may pad responses with junk.
pub fn gather(records: &[(Name, Nsec3Rdata)]) -> Result<Nsec3Set, Nsec3Error> {
    let mut set: Option<Nsec3Set> = None;

    for (owner, rdata) in records {
        let Some(first_label) = owner.leftmost() else {
            return Err(Nsec3Error::BadOwnerName);
        };
        let Some(zone) = owner.parent() else {
            return Err(Nsec3Error::BadOwnerName);
        };
        let Some(owner_hash) = decode_hash_label(first_label) else {
            debug!(%owner, "skipping NSEC3 with undecodable owner label");
            continue;
        };
        let params = Nsec3Params {
            hash_algorithm: rdata.hash_algorithm,
            iterations: rdata.iterations,
            salt: rdata.salt.clone(),
        };

        match &mut set {
            None => {
                set = Some(Nsec3Set {
                    zone,
                    params,
                    entries: vec![Nsec3Entry {
                        owner_hash,
                        rdata: rdata.clone(),
                    }],
                });
            }
            Some(existing) => {
                if existing.params != params || existing.zone != zone {
                    return Err(Nsec3Error::MixedParameters);
                }
                existing.entries.push(Nsec3Entry {
                    owner_hash,
                    rdata: rdata.clone(),
                });
            }
        }
    }

    set.ok_or(Nsec3Error::NoRecords)
}

impl Nsec3Set {
    pub fn entries(&self) -> &[Nsec3Entry] {
        &self.entries
    }

    fn hash(&self, name: &Name) -> Result<Vec<u8>, Nsec3Error> {
        hash_name(
            name,
            self.params.hash_algorithm,
            self.params.iterations,
            &self.params.salt,
        )
    }

    /// The entry whose owner hash equals the hash of `name`
    pub fn find_match(&self, name: &Name) -> Option<&Nsec3Entry> {
        let hash = self.hash(name).ok()?;
        self.entries.iter().find(|e| e.owner_hash == hash)
    }

    /// The entry whose hash interval strictly contains the hash of `name`,
    /// with wrap-around on the zone's hash ring
    pub fn find_covering(&self, name: &Name) -> Option<&Nsec3Entry> {
        let hash = self.hash(name).ok()?;
        self.entries.iter().find(|e| {
            let owner = &e.owner_hash;
            let next = &e.rdata.next_hashed;
            if owner < next {
                *owner < hash && hash < *next
            } else {
                // Last interval of the ring
                *owner < hash || hash < *next
            }
        })
    }

    /// Walk ancestors of `qname` from deepest to the zone apex; the first
    /// owner-matching ancestor is the closest encloser.
    pub fn closest_encloser(&self, qname: &Name) -> Option<(Name, &Nsec3Entry)> {
        let mut candidate = qname.clone();
        loop {
            if candidate.is_subdomain_of(&self.zone) {
                if let Some(entry) = self.find_match(&candidate) {
                    return Some((candidate, entry));
                }
            }
            if candidate == self.zone {
                return None;
            }
            candidate = candidate.parent()?;
        }
    }

    /// The name one label below the closest encloser on the path to qname
    pub fn next_closer(ce: &Name, qname: &Name) -> Name {
        qname.suffix(ce.label_count() + 1)
    }
}

/// NXDOMAIN proof (RFC 5155 section 8.4): closest-encloser match, covered
/// next-closer, covered wildcard. Opt-out on the next-closer interval
/// downgrades to INSECURE.
pub fn prove_name_error(set: &Nsec3Set, qname: &Name) -> Nsec3Outcome {
    let Some((ce, ce_entry)) = set.closest_encloser(qname) else {
        debug!(%qname, "no closest encloser match");
        return Nsec3Outcome::Bogus;
    };
    if &ce == qname {
        debug!(%qname, "name has an NSEC3 owner match, cannot be NXDOMAIN");
        return Nsec3Outcome::Bogus;
    }
    // A closest encloser that is a zone cut belongs to a child zone; this
    // zone cannot assert NXDOMAIN below it
    let ce_types = &ce_entry.rdata.types;
    if ce_types.contains(RecordType::NS) && !ce_types.contains(RecordType::SOA) {
        debug!(%ce, "closest encloser is a delegation");
        return Nsec3Outcome::Bogus;
    }

    let next_closer = Nsec3Set::next_closer(&ce, qname);
    let Some(covering) = set.find_covering(&next_closer) else {
        debug!(%qname, %next_closer, "next closer is not covered");
        return Nsec3Outcome::Bogus;
    };
    let opt_out = covering.rdata.opt_out();

    let wildcard = ce.to_wildcard();
    if set.find_match(&wildcard).is_some() {
        debug!(%wildcard, "wildcard exists, NXDOMAIN proof fails");
        return Nsec3Outcome::Bogus;
    }
    if set.find_covering(&wildcard).is_none() {
        debug!(%wildcard, "source of synthesis is not covered");
        return Nsec3Outcome::Bogus;
    }

    if opt_out {
        trace!(%qname, "NXDOMAIN proof rests on opt-out");
        return Nsec3Outcome::Insecure;
    }
    Nsec3Outcome::Secure
}

/// NODATA proof (RFC 5155 section 8.5-8.7), including the ENT and wildcard
/// variants and the opt-out DS case.
pub fn prove_nodata(set: &Nsec3Set, qname: &Name, qtype: RecordType) -> Nsec3Outcome {
    if let Some(entry) = set.find_match(qname) {
        let types = &entry.rdata.types;
        if types.contains(qtype) || types.contains(RecordType::CNAME) {
            debug!(%qname, %qtype, "NSEC3 bitmap shows the type exists");
            return Nsec3Outcome::Bogus;
        }
        // Wrong side of a zone cut: a parent-side NSEC3 only answers for DS,
        // the child apex never does
        if qtype != RecordType::DS
            && types.contains(RecordType::NS)
            && !types.contains(RecordType::SOA)
        {
            return Nsec3Outcome::Bogus;
        }
        if qtype == RecordType::DS && types.contains(RecordType::SOA) {
            return Nsec3Outcome::Bogus;
        }
        // An empty bitmap is an empty non-terminal: NODATA for every type
        return Nsec3Outcome::Secure;
    }

    let Some((ce, _)) = set.closest_encloser(qname) else {
        debug!(%qname, "no closest encloser match for NODATA");
        return Nsec3Outcome::Bogus;
    };
    let next_closer = Nsec3Set::next_closer(&ce, qname);

    let Some(covering) = set.find_covering(&next_closer) else {
        return Nsec3Outcome::Bogus;
    };

    if let Some(wc_entry) = set.find_match(&ce.to_wildcard()) {
        let types = &wc_entry.rdata.types;
        if !types.contains(qtype) && !types.contains(RecordType::CNAME) {
            trace!(%qname, "wildcard NODATA proven");
            return Nsec3Outcome::Secure;
        }
        return Nsec3Outcome::Bogus;
    }

    // No wildcard in play: for DS queries an opt-out interval legitimately
    // hides an unsigned delegation
    if qtype == RecordType::DS && covering.rdata.opt_out() {
        trace!(%qname, "opt-out NODATA for DS");
        return Nsec3Outcome::Insecure;
    }

    debug!(%qname, %qtype, "NSEC3 NODATA proof incomplete");
    Nsec3Outcome::Bogus
}

/// Wildcard-expanded positive answer: the next closer under the wildcard's
/// parent must be covered, proving the exact qname does not exist.
pub fn prove_wildcard(set: &Nsec3Set, qname: &Name, wildcard: &Name) -> bool {
    let Some(ce) = wildcard.parent() else {
        return false;
    };
    if !qname.is_subdomain_of(&ce) {
        return false;
    }
    let next_closer = Nsec3Set::next_closer(&ce, qname);
    set.find_covering(&next_closer).is_some()
}

/// What the NSEC3 set says about DS at a delegation
pub fn prove_no_ds(set: &Nsec3Set, qname: &Name) -> NoDsProof {
    if let Some(entry) = set.find_match(qname) {
        let types = &entry.rdata.types;
        if types.contains(RecordType::DS) || types.contains(RecordType::SOA) {
            return NoDsProof::Bogus;
        }
        if types.contains(RecordType::NS) {
            return NoDsProof::InsecureDelegation;
        }
        return NoDsProof::NotDelegation;
    }

    let Some((ce, _)) = set.closest_encloser(qname) else {
        return NoDsProof::None;
    };
    let next_closer = Nsec3Set::next_closer(&ce, qname);
    match set.find_covering(&next_closer) {
        Some(covering) if covering.rdata.opt_out() => NoDsProof::InsecureDelegation,
        Some(_) => NoDsProof::Bogus,
        None => NoDsProof::None,
    }
}

/// Apply the per-key-size iteration ceiling: a zone whose NSEC3 chain uses
/// more iterations than configured for its signing key size is treated as
/// insecure, never bogus.
pub fn iterations_acceptable(
    config: &ValidatorConfig,
    params: &Nsec3Params,
    key_size_bits: usize,
) -> bool {
    params.iterations <= config.max_iterations_for_key_bits(key_size_bits)
}
