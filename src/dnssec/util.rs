use crate::dns::{Name, RecordType};

use super::message::{SMessage, Section};

/// The zone whose keys must sign this response: the signer name of the
/// answer chain's signatures, else of the authority proofs, else the SOA
/// owner, else the query name itself (for entirely unsigned responses the
/// DS walk toward this name discovers where the chain ends).
pub fn find_target_signer(message: &SMessage, qname: &Name) -> Name {
    for rrset in message.section(Section::Answer) {
        if let Some(signer) = rrset.signer() {
            return signer;
        }
    }
    for rrset in message.section(Section::Authority) {
        if matches!(
            rrset.rtype(),
            RecordType::SOA | RecordType::NSEC | RecordType::NSEC3
        ) {
            if let Some(signer) = rrset.signer() {
                return signer;
            }
        }
    }
    for rrset in message.section(Section::Authority) {
        if rrset.rtype() == RecordType::SOA {
            return rrset.name().clone();
        }
    }
    qname.clone()
}
