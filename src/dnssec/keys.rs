use tracing::{debug, trace};

use crate::config::ValidatorConfig;
use crate::dns::{DnskeyRdata, DsRdata, Name, RecordClass};

use super::algorithm::{algorithm_supported, DigestType};
use super::message::{SRRset, SecurityStatus};
use super::verify::{RrsetVerifier, SigBudget};
use super::CancelToken;

/// The outcome of establishing keys for one zone. A closed sum: proof
/// correctness depends on distinguishing "validated keys" from "provably
/// unsigned" from "validation failed".
#[derive(Debug, Clone)]
pub enum KeyEntry {
    /// A validated DNSKEY set usable to verify child signatures
    Good { keys: SRRset },
    /// The zone is provably unsigned (insecure delegation)
    Null {
        name: Name,
        class: RecordClass,
        ttl: u32,
    },
    /// Key-set validation failed
    Bad {
        name: Name,
        class: RecordClass,
        reason: String,
        ttl: u32,
    },
}

impl KeyEntry {
    pub fn good(keys: SRRset) -> Self {
        KeyEntry::Good { keys }
    }

    pub fn null(name: Name, class: RecordClass, ttl: u32) -> Self {
        KeyEntry::Null { name, class, ttl }
    }

    pub fn bad(name: Name, class: RecordClass, reason: impl Into<String>, ttl: u32) -> Self {
        KeyEntry::Bad {
            name,
            class,
            reason: reason.into(),
            ttl,
        }
    }

    pub fn name(&self) -> &Name {
        match self {
            KeyEntry::Good { keys } => keys.name(),
            KeyEntry::Null { name, .. } | KeyEntry::Bad { name, .. } => name,
        }
    }

    pub fn class(&self) -> RecordClass {
        match self {
            KeyEntry::Good { keys } => keys.class(),
            KeyEntry::Null { class, .. } | KeyEntry::Bad { class, .. } => *class,
        }
    }

    pub fn ttl(&self) -> u32 {
        match self {
            KeyEntry::Good { keys } => keys.ttl(),
            KeyEntry::Null { ttl, .. } | KeyEntry::Bad { ttl, .. } => *ttl,
        }
    }

    pub fn is_good(&self) -> bool {
        matches!(self, KeyEntry::Good { .. })
    }

    pub fn is_null(&self) -> bool {
        matches!(self, KeyEntry::Null { .. })
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, KeyEntry::Bad { .. })
    }

    pub fn good_keys(&self) -> Option<&SRRset> {
        match self {
            KeyEntry::Good { keys } => Some(keys),
            _ => None,
        }
    }

    pub fn bad_reason(&self) -> Option<&str> {
        match self {
            KeyEntry::Bad { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Compute the DS digest of a DNSKEY: digest(owner canonical wire ||
/// DNSKEY RDATA), RFC 4034 section 5.1.4
pub fn ds_digest(owner: &Name, key: &DnskeyRdata, digest_type: DigestType) -> Option<Vec<u8>> {
    let mut data = owner.canonical_wire();
    data.extend_from_slice(&key.to_rdata());
    digest_type.digest(&data)
}

/// A DS matches a DNSKEY iff digest, key tag and algorithm all agree
pub fn ds_matches_key(owner: &Name, ds: &DsRdata, key: &DnskeyRdata) -> bool {
    if ds.key_tag != key.key_tag() || ds.algorithm != key.algorithm {
        return false;
    }
    let Some(digest_type) = DigestType::from_u8(ds.digest_type) else {
        return false;
    };
    match ds_digest(owner, key, digest_type) {
        Some(digest) => digest == ds.digest,
        None => false,
    }
}

/// Filter a DS set down to the records this validator can act on: supported
/// digest type and signing algorithm. With `harden.algo.downgrade`, only the
/// most-preferred digest type present survives, so an attacker cannot steer
/// validation onto a weaker digest.
pub fn usable_ds_records(ds_set: &SRRset, config: &ValidatorConfig) -> Vec<DsRdata> {
    let mut usable: Vec<DsRdata> = ds_set
        .records()
        .iter()
        .filter_map(|r| r.ds().ok())
        .filter(|ds| {
            let supported = DigestType::from_u8(ds.digest_type)
                .is_some_and(|d| d.is_supported() && config.digest_preference.contains(&ds.digest_type))
                && algorithm_supported(ds.algorithm);
            if !supported {
                trace!(
                    key_tag = ds.key_tag,
                    digest_type = ds.digest_type,
                    algorithm = ds.algorithm,
                    "ignoring DS with unsupported parameters"
                );
            }
            supported
        })
        .collect();

    if config.harden_algo_downgrade && !usable.is_empty() {
        let rank = |dt: u8| {
            config
                .digest_preference
                .iter()
                .position(|&p| p == dt)
                .unwrap_or(usize::MAX)
        };
        let best = usable.iter().map(|ds| rank(ds.digest_type)).min().unwrap_or(usize::MAX);
        usable.retain(|ds| rank(ds.digest_type) == best);
    }
    usable
}

/// Validate a DNSKEY RRset against its parent's DS set: a usable DS must
/// bind one of the keys, and that key must have signed the DNSKEY RRset
/// itself. An empty usable set from a non-empty DS set means the zone uses
/// only algorithms we cannot follow, which is insecure, not bogus.
pub fn verify_dnskey_with_ds(
    dnskey_rrset: &mut SRRset,
    ds_set: &SRRset,
    config: &ValidatorConfig,
    verifier: &RrsetVerifier,
    budget: &mut SigBudget,
    cancel: &CancelToken,
) -> KeyEntry {
    let name = dnskey_rrset.name().clone();
    let class = dnskey_rrset.class();

    let usable = usable_ds_records(ds_set, config);
    if usable.is_empty() {
        if ds_set.records().is_empty() {
            return KeyEntry::bad(name, class, "empty DS set", config.bad_key_ttl.as_secs() as u32);
        }
        debug!(zone = %name, "DS set has no supported algorithms, treating zone as insecure");
        return KeyEntry::null(name, class, ds_set.ttl());
    }

    let parsed_keys: Vec<DnskeyRdata> = dnskey_rrset
        .records()
        .iter()
        .filter_map(|r| r.dnskey().ok())
        .collect();
    let keys_view = dnskey_rrset.clone();

    let mut matched_any = false;
    for ds in &usable {
        for key in &parsed_keys {
            if !ds_matches_key(&name, ds, key) {
                continue;
            }
            matched_any = true;
            trace!(zone = %name, key_tag = ds.key_tag, "DS matches DNSKEY, checking self-signature");

            if verifier.verify_rrset_with_key(dnskey_rrset, &keys_view, key, budget, cancel)
                == SecurityStatus::Secure
            {
                return KeyEntry::good(dnskey_rrset.clone());
            }
        }
    }

    let reason = if matched_any {
        "DNSKEY RRset is not signed by a DS-anchored key"
    } else {
        "no DNSKEY matches a usable DS record"
    };
    debug!(zone = %name, reason, "DNSKEY validation failed");
    dnskey_rrset.set_bogus(reason);
    KeyEntry::bad(name, class, reason, config.bad_key_ttl.as_secs() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Record, RecordType};

    fn test_key() -> DnskeyRdata {
        DnskeyRdata {
            flags: 257,
            protocol: 3,
            algorithm: 15,
            public_key: vec![0x42; 32],
        }
    }

    fn key_rrset(owner: &str, key: &DnskeyRdata) -> SRRset {
        SRRset::new(Record::new(
            Name::parse(owner).unwrap(),
            RecordType::DNSKEY,
            RecordClass::IN,
            3600,
            key.to_rdata(),
        ))
    }

    fn ds_rrset(owner: &str, ds: &DsRdata) -> SRRset {
        SRRset::new(Record::new(
            Name::parse(owner).unwrap(),
            RecordType::DS,
            RecordClass::IN,
            3600,
            ds.to_rdata(),
        ))
    }

    #[test]
    fn ds_binding_round_trip() {
        let owner = Name::parse("example.com").unwrap();
        let key = test_key();
        let digest = ds_digest(&owner, &key, DigestType::Sha256).unwrap();
        let ds = DsRdata {
            key_tag: key.key_tag(),
            algorithm: key.algorithm,
            digest_type: 2,
            digest,
        };
        assert!(ds_matches_key(&owner, &ds, &key));

        let wrong_tag = DsRdata {
            key_tag: key.key_tag().wrapping_add(1),
            ..ds.clone()
        };
        assert!(!ds_matches_key(&owner, &wrong_tag, &key));

        let wrong_digest = DsRdata {
            digest: vec![0u8; 32],
            ..ds
        };
        assert!(!ds_matches_key(&owner, &wrong_digest, &key));
    }

    #[test]
    fn ds_digest_is_owner_sensitive() {
        let key = test_key();
        let a = ds_digest(&Name::parse("a.example").unwrap(), &key, DigestType::Sha256);
        let b = ds_digest(&Name::parse("b.example").unwrap(), &key, DigestType::Sha256);
        assert_ne!(a, b);
    }

    #[test]
    fn unsupported_digest_is_ignored() {
        let config = ValidatorConfig::default();
        let key = test_key();
        let ds = DsRdata {
            key_tag: key.key_tag(),
            algorithm: 15,
            digest_type: 3, // GOST, unsupported
            digest: vec![0u8; 32],
        };
        let set = ds_rrset("example.com", &ds);
        assert!(usable_ds_records(&set, &config).is_empty());
    }

    #[test]
    fn downgrade_hardening_keeps_preferred_digest() {
        let mut config = ValidatorConfig::default();
        config.harden_algo_downgrade = true;
        let owner = Name::parse("example.com").unwrap();
        let key = test_key();

        let sha256 = DsRdata {
            key_tag: key.key_tag(),
            algorithm: 15,
            digest_type: 2,
            digest: ds_digest(&owner, &key, DigestType::Sha256).unwrap(),
        };
        let sha1 = DsRdata {
            key_tag: key.key_tag(),
            algorithm: 15,
            digest_type: 1,
            digest: ds_digest(&owner, &key, DigestType::Sha1).unwrap(),
        };

        let mut set = ds_rrset("example.com", &sha1);
        set.push(Record::new(
            owner.clone(),
            RecordType::DS,
            RecordClass::IN,
            3600,
            sha256.to_rdata(),
        ));

        let usable = usable_ds_records(&set, &config);
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].digest_type, 2);

        config.harden_algo_downgrade = false;
        assert_eq!(usable_ds_records(&set, &config).len(), 2);
    }

    #[test]
    fn unsupported_algorithms_yield_null_entry() {
        let config = ValidatorConfig::default();
        let verifier = RrsetVerifier::new(&config);
        let key = test_key();
        let ds = DsRdata {
            key_tag: 1,
            algorithm: 12, // GOST signing, unsupported
            digest_type: 2,
            digest: vec![0u8; 32],
        };
        let ds_set = ds_rrset("example.com", &ds);
        let mut keys = key_rrset("example.com", &key);
        let mut budget = SigBudget::new(10);
        let entry = verify_dnskey_with_ds(
            &mut keys,
            &ds_set,
            &config,
            &verifier,
            &mut budget,
            &CancelToken::new(),
        );
        assert!(entry.is_null());
    }

    #[test]
    fn mismatched_ds_yields_bad_entry() {
        let config = ValidatorConfig::default();
        let verifier = RrsetVerifier::new(&config);
        let key = test_key();
        let ds = DsRdata {
            key_tag: key.key_tag(),
            algorithm: 15,
            digest_type: 2,
            digest: vec![0u8; 32], // wrong digest
        };
        let ds_set = ds_rrset("example.com", &ds);
        let mut keys = key_rrset("example.com", &key);
        let mut budget = SigBudget::new(10);
        let entry = verify_dnskey_with_ds(
            &mut keys,
            &ds_set,
            &config,
            &verifier,
            &mut budget,
            &CancelToken::new(),
        );
        assert!(entry.is_bad());
    }
}
