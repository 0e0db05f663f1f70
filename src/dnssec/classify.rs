use std::fmt;

use tracing::trace;

use crate::dns::{Name, Rcode, RecordType};

use super::message::{SMessage, Section};

/// Closed set of response shapes; each has its own proof obligations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClassification {
    Unknown,
    Positive,
    Cname,
    Nodata,
    NameError,
    Any,
    CnameNodata,
    CnameNameError,
    Referral,
}

impl fmt::Display for ResponseClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "UNKNOWN",
            Self::Positive => "POSITIVE",
            Self::Cname => "CNAME",
            Self::Nodata => "NODATA",
            Self::NameError => "NAMEERROR",
            Self::Any => "ANY",
            Self::CnameNodata => "CNAME_NODATA",
            Self::CnameNameError => "CNAME_NAMEERROR",
            Self::Referral => "REFERRAL",
        };
        write!(f, "{}", label)
    }
}

/// Decide the classification from header, question and section shapes
/// alone. Unknown layouts are later failed as bogus rather than guessed at.
pub fn classify(message: &SMessage) -> ResponseClassification {
    let Some(question) = message.question() else {
        return ResponseClassification::Unknown;
    };
    let qname = question.name.clone();
    let qtype = question.qtype;

    let rcode = Rcode::from(message.rcode());
    if rcode != Rcode::NoError && rcode != Rcode::NxDomain {
        return ResponseClassification::Unknown;
    }

    // Walk the answer section following the CNAME chain from qname
    let mut current = qname;
    let mut saw_cname = false;
    let mut terminal = false;
    for rrset in message.section(Section::Answer) {
        if rrset.rtype() == RecordType::RRSIG {
            continue;
        }
        if rrset.name() != &current {
            // Out-of-chain data in the answer section
            if terminal {
                continue;
            }
            trace!(owner = %rrset.name(), "answer RRset outside the query chain");
            return ResponseClassification::Unknown;
        }
        if qtype == RecordType::ANY {
            terminal = true;
            continue;
        }
        if rrset.rtype() == RecordType::CNAME && qtype != RecordType::CNAME {
            let Some(target) = rrset
                .records()
                .first()
                .and_then(|r| cname_target(&r.rdata))
            else {
                return ResponseClassification::Unknown;
            };
            current = target;
            saw_cname = true;
            continue;
        }
        if rrset.rtype() == qtype {
            terminal = true;
            continue;
        }
        return ResponseClassification::Unknown;
    }

    if rcode == Rcode::NxDomain {
        return if saw_cname {
            ResponseClassification::CnameNameError
        } else if !terminal && message.section(Section::Answer).is_empty() {
            ResponseClassification::NameError
        } else {
            ResponseClassification::Unknown
        };
    }

    if terminal {
        return if qtype == RecordType::ANY {
            ResponseClassification::Any
        } else if saw_cname {
            ResponseClassification::Cname
        } else {
            ResponseClassification::Positive
        };
    }

    // No terminal answer: referral, NODATA, or nothing we can name
    let authority = message.section(Section::Authority);
    let has_soa = authority.iter().any(|s| s.rtype() == RecordType::SOA);
    let has_ns = authority.iter().any(|s| s.rtype() == RecordType::NS);
    let has_denial = authority
        .iter()
        .any(|s| matches!(s.rtype(), RecordType::NSEC | RecordType::NSEC3));

    if !saw_cname && message.section(Section::Answer).is_empty() && has_ns && !has_soa {
        return ResponseClassification::Referral;
    }
    if has_soa || has_denial {
        return if saw_cname {
            ResponseClassification::CnameNodata
        } else {
            ResponseClassification::Nodata
        };
    }
    ResponseClassification::Unknown
}

/// The final owner name a CNAME chain in the answer leads to
pub fn final_chain_name(message: &SMessage) -> Option<Name> {
    let mut current = message.qname()?.clone();
    for rrset in message.section(Section::Answer) {
        if rrset.rtype() == RecordType::CNAME && rrset.name() == &current {
            if let Some(target) = rrset.records().first().and_then(|r| cname_target(&r.rdata)) {
                current = target;
            }
        }
    }
    Some(current)
}

fn cname_target(rdata: &[u8]) -> Option<Name> {
    let (labels, _) = crate::dns::parse_name_at(rdata, 0).ok()?;
    Name::from_labels(labels).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Message, NsecRdata, Record, RecordClass, TypeBitmap};

    fn name(s: &str) -> Name {
        Name::parse(s).unwrap()
    }

    fn record(owner: &str, rtype: RecordType, rdata: Vec<u8>) -> Record {
        Record::new(name(owner), rtype, RecordClass::IN, 300, rdata)
    }

    fn soa_rdata() -> Vec<u8> {
        let mut rdata = name("ns1.example.com").wire();
        rdata.extend(name("hostmaster.example.com").wire());
        rdata.extend_from_slice(&[0u8; 20]);
        rdata
    }

    fn response(qname: &str, qtype: RecordType, rcode: u8) -> Message {
        let mut message = Message::query(name(qname), qtype);
        message.header.qr = true;
        message.header.rcode = rcode;
        message
    }

    fn classify_message(message: &Message) -> ResponseClassification {
        classify(&SMessage::from_message(message))
    }

    #[test]
    fn positive_answer() {
        let mut message = response("www.example.com", RecordType::A, 0);
        message
            .answers
            .push(record("www.example.com", RecordType::A, vec![192, 0, 2, 1]));
        assert_eq!(classify_message(&message), ResponseClassification::Positive);
    }

    #[test]
    fn cname_to_answer() {
        let mut message = response("alias.example.com", RecordType::A, 0);
        message.answers.push(record(
            "alias.example.com",
            RecordType::CNAME,
            name("www.example.com").wire(),
        ));
        message
            .answers
            .push(record("www.example.com", RecordType::A, vec![192, 0, 2, 1]));
        assert_eq!(classify_message(&message), ResponseClassification::Cname);
        assert_eq!(
            final_chain_name(&SMessage::from_message(&message)),
            Some(name("www.example.com"))
        );
    }

    #[test]
    fn cname_without_terminal_is_cname_nodata() {
        let mut message = response("alias.example.com", RecordType::A, 0);
        message.answers.push(record(
            "alias.example.com",
            RecordType::CNAME,
            name("target.example.com").wire(),
        ));
        message
            .authorities
            .push(record("example.com", RecordType::SOA, soa_rdata()));
        assert_eq!(
            classify_message(&message),
            ResponseClassification::CnameNodata
        );
    }

    #[test]
    fn cname_chain_to_nxdomain() {
        let mut message = response("alias.example.com", RecordType::A, 3);
        message.answers.push(record(
            "alias.example.com",
            RecordType::CNAME,
            name("gone.example.com").wire(),
        ));
        assert_eq!(
            classify_message(&message),
            ResponseClassification::CnameNameError
        );
    }

    #[test]
    fn nxdomain() {
        let mut message = response("gone.example.com", RecordType::A, 3);
        message
            .authorities
            .push(record("example.com", RecordType::SOA, soa_rdata()));
        assert_eq!(classify_message(&message), ResponseClassification::NameError);
    }

    #[test]
    fn nodata_with_soa() {
        let mut message = response("www.example.com", RecordType::AAAA, 0);
        message
            .authorities
            .push(record("example.com", RecordType::SOA, soa_rdata()));
        assert_eq!(classify_message(&message), ResponseClassification::Nodata);
    }

    #[test]
    fn nodata_with_nsec_only() {
        let mut message = response("www.example.com", RecordType::AAAA, 0);
        let nsec = NsecRdata {
            next: name("zz.example.com"),
            types: TypeBitmap::from_types(&[RecordType::A]),
        };
        message
            .authorities
            .push(record("www.example.com", RecordType::NSEC, nsec.to_rdata()));
        assert_eq!(classify_message(&message), ResponseClassification::Nodata);
    }

    #[test]
    fn referral_shape() {
        let mut message = response("www.sub.example.com", RecordType::A, 0);
        message.authorities.push(record(
            "sub.example.com",
            RecordType::NS,
            name("ns1.sub.example.com").wire(),
        ));
        assert_eq!(classify_message(&message), ResponseClassification::Referral);
    }

    #[test]
    fn any_answer() {
        let mut message = response("www.example.com", RecordType::ANY, 0);
        message
            .answers
            .push(record("www.example.com", RecordType::A, vec![192, 0, 2, 1]));
        assert_eq!(classify_message(&message), ResponseClassification::Any);
    }

    #[test]
    fn unrelated_answer_is_unknown() {
        let mut message = response("www.example.com", RecordType::A, 0);
        message
            .answers
            .push(record("other.example.com", RecordType::A, vec![192, 0, 2, 1]));
        assert_eq!(classify_message(&message), ResponseClassification::Unknown);
    }

    #[test]
    fn empty_noerror_is_unknown() {
        let message = response("www.example.com", RecordType::A, 0);
        assert_eq!(classify_message(&message), ResponseClassification::Unknown);
    }

    #[test]
    fn servfail_is_unknown() {
        let message = response("www.example.com", RecordType::A, 2);
        assert_eq!(classify_message(&message), ResponseClassification::Unknown);
    }
}
