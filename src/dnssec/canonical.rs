use crate::dns::{parse_name_at, Record, RecordType, RrsigRdata};

use super::message::SRRset;

/// RDATA with embedded names lowercased for the RFC 4034 section 6.2 type
/// list (the subset this model carries). Anything malformed is passed
/// through unchanged; signature verification will reject it anyway.
pub fn canonical_rdata(rtype: RecordType, rdata: &[u8]) -> Vec<u8> {
    let result = match rtype {
        RecordType::NS | RecordType::CNAME | RecordType::PTR => rewrite_names(rdata, 0, 1),
        // SOA: mname, rname, then five fixed u32 fields
        RecordType::SOA => rewrite_names(rdata, 0, 2),
        // MX: u16 preference, then exchange name
        RecordType::MX => rewrite_names(rdata, 2, 1),
        // SRV: priority, weight, port, then target name
        RecordType::SRV => rewrite_names(rdata, 6, 1),
        _ => None,
    };
    result.unwrap_or_else(|| rdata.to_vec())
}

/// Copy `prefix` bytes verbatim, lowercase the next `names` embedded names,
/// then copy the remainder. Names inside signed RDATA are never compressed.
fn rewrite_names(rdata: &[u8], prefix: usize, names: usize) -> Option<Vec<u8>> {
    if rdata.len() < prefix {
        return None;
    }
    let mut out = rdata[..prefix].to_vec();
    let mut pos = prefix;
    for _ in 0..names {
        let (labels, end) = parse_name_at(rdata, pos).ok()?;
        for label in &labels {
            out.push(label.len() as u8);
            out.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
        }
        out.push(0);
        pos = end;
    }
    out.extend_from_slice(&rdata[pos..]);
    Some(out)
}

/// Sort records into canonical RDATA order (RFC 4034 section 6.3)
pub fn canonical_sort(records: &[Record]) -> Vec<&Record> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| {
        canonical_rdata(a.rtype, &a.rdata).cmp(&canonical_rdata(b.rtype, &b.rdata))
    });
    sorted
}

/// Build the signed data for one RRSIG over one RRset (RFC 4035 section
/// 5.3.2): the RRSIG RDATA without the signature, then every RR in
/// canonical form, using the RRSIG original TTL and the wildcard-reduced
/// owner when the label count says the answer was synthesized.
pub fn signed_data(rrset: &SRRset, rrsig: &RrsigRdata) -> Vec<u8> {
    let mut data = rrsig.rdata_without_signature(true);

    let owner = rrset.name();
    let owner_wire = if (rrsig.labels as usize) < owner.label_count() {
        owner
            .suffix(rrsig.labels as usize)
            .to_wildcard()
            .canonical_wire()
    } else {
        owner.canonical_wire()
    };

    let rtype: u16 = rrset.rtype().into();
    let class: u16 = rrset.class().into();
    for record in canonical_sort(rrset.records()) {
        let rdata = canonical_rdata(record.rtype, &record.rdata);
        data.extend_from_slice(&owner_wire);
        data.extend_from_slice(&rtype.to_be_bytes());
        data.extend_from_slice(&class.to_be_bytes());
        data.extend_from_slice(&rrsig.original_ttl.to_be_bytes());
        data.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        data.extend_from_slice(&rdata);
    }
    data
}
