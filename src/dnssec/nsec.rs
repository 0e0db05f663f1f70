use std::cmp::Ordering;

use tracing::{debug, trace};

use crate::dns::{Name, NsecRdata, RecordType};

/// A verified NSEC record, ready for proof checks
pub type NsecEntry = (Name, NsecRdata);

/// What an NSEC scan established about DS absence at a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDsProof {
    /// A delegation exists and provably carries no DS: the child is insecure
    InsecureDelegation,
    /// The name exists but is not a zone cut; the chain continues downward
    NotDelegation,
    /// The records contradict DS absence
    Bogus,
    /// Nothing usable was found
    None,
}

/// True if `name` falls strictly between the NSEC owner and its next name
/// in canonical order, honoring the end-of-zone wrap-around.
pub fn covers(owner: &Name, nsec: &NsecRdata, name: &Name) -> bool {
    let next = &nsec.next;
    match owner.canonical_cmp(next) {
        Ordering::Less => {
            owner.canonical_cmp(name) == Ordering::Less
                && name.canonical_cmp(next) == Ordering::Less
        }
        // Last NSEC of the zone: next points back at the apex
        Ordering::Greater | Ordering::Equal => {
            owner.canonical_cmp(name) == Ordering::Less
                || name.canonical_cmp(next) == Ordering::Less
        }
    }
}

/// The closest encloser this NSEC demonstrates for `name`: the longest of
/// the common suffixes with the owner and the next name.
pub fn closest_encloser(name: &Name, owner: &Name, nsec: &NsecRdata) -> Name {
    let with_owner = name.longest_common_suffix(owner);
    let with_next = name.longest_common_suffix(&nsec.next);
    if with_owner.label_count() >= with_next.label_count() {
        with_owner
    } else {
        with_next
    }
}

/// NXDOMAIN proof: some NSEC covers `qname`, and some NSEC covers the
/// source of synthesis `*.<closest encloser>` so no wildcard could have
/// answered instead.
pub fn prove_name_error(nsecs: &[NsecEntry], qname: &Name) -> bool {
    let mut ce = None;
    for (owner, nsec) in nsecs {
        if covers(owner, nsec, qname) {
            ce = Some(closest_encloser(qname, owner, nsec));
            break;
        }
    }
    let Some(ce) = ce else {
        debug!(%qname, "no NSEC covers the name");
        return false;
    };

    let wildcard = ce.to_wildcard();
    for (owner, nsec) in nsecs {
        if owner == &wildcard {
            debug!(%wildcard, "wildcard exists, NXDOMAIN proof fails");
            return false;
        }
        if covers(owner, nsec, &wildcard) {
            trace!(%qname, %wildcard, "NXDOMAIN proven");
            return true;
        }
    }
    debug!(%qname, %wildcard, "no NSEC covers the source of synthesis");
    false
}

/// NODATA proof: an owner-matching NSEC whose bitmap lacks the qtype and
/// CNAME, an empty non-terminal, or the wildcard-NODATA variant.
pub fn prove_nodata(nsecs: &[NsecEntry], qname: &Name, qtype: RecordType) -> bool {
    for (owner, nsec) in nsecs {
        if owner == qname {
            if nsec.types.contains(qtype) || nsec.types.contains(RecordType::CNAME) {
                debug!(%qname, %qtype, "NSEC bitmap shows the type exists");
                return false;
            }
            // A parent-side NSEC at a zone cut only proves absence for DS
            // (RFC 6840 section 4.3)
            if qtype != RecordType::DS
                && nsec.types.contains(RecordType::NS)
                && !nsec.types.contains(RecordType::SOA)
            {
                continue;
            }
            // And the child-side apex set cannot prove DS absence
            if qtype == RecordType::DS && nsec.types.contains(RecordType::SOA) {
                continue;
            }
            return true;
        }

        // Empty non-terminal: the next name hangs below qname, so qname
        // exists with no data at all
        if covers(owner, nsec, qname)
            && nsec.next.is_subdomain_of(qname)
            && &nsec.next != qname
        {
            trace!(%qname, "empty non-terminal NODATA");
            return true;
        }
    }

    // Wildcard NODATA: qname itself is covered but a wildcard at the
    // closest encloser exists without the qtype
    for (owner, nsec) in nsecs {
        if !covers(owner, nsec, qname) {
            continue;
        }
        let wildcard = closest_encloser(qname, owner, nsec).to_wildcard();
        for (wc_owner, wc_nsec) in nsecs {
            if wc_owner == &wildcard
                && !wc_nsec.types.contains(qtype)
                && !wc_nsec.types.contains(RecordType::CNAME)
            {
                trace!(%qname, %wildcard, "wildcard NODATA proven");
                return true;
            }
        }
    }
    false
}

/// Wildcard-expanded positive answer: prove the exact qname does not exist,
/// so synthesis from `*.<ce>` was legitimate.
pub fn prove_wildcard(nsecs: &[NsecEntry], qname: &Name, wildcard: &Name) -> bool {
    if !qname.is_subdomain_of(&wildcard.parent().unwrap_or_else(Name::root)) {
        return false;
    }
    nsecs.iter().any(|(owner, nsec)| covers(owner, nsec, qname))
}

/// Referral handling: what the NSEC at a delegation point says about DS
pub fn prove_no_ds(nsecs: &[NsecEntry], qname: &Name) -> NoDsProof {
    for (owner, nsec) in nsecs {
        if owner == qname {
            if nsec.types.contains(RecordType::DS) {
                return NoDsProof::Bogus;
            }
            if nsec.types.contains(RecordType::SOA) {
                // Child-side apex NSEC, wrong side of the cut for DS proofs
                return NoDsProof::Bogus;
            }
            if nsec.types.contains(RecordType::NS) {
                return NoDsProof::InsecureDelegation;
            }
            return NoDsProof::NotDelegation;
        }
        // An empty non-terminal on the way down is not a zone cut
        if covers(owner, nsec, qname) && nsec.next.is_subdomain_of(qname) && &nsec.next != qname {
            return NoDsProof::NotDelegation;
        }
    }
    NoDsProof::None
}
