use super::enums::{RecordClass, RecordType};
use super::name::Name;
use super::record::Record;

/// DO ("DNSSEC OK") bit in the EDNS flags word
const DO_FLAG: u16 = 0x8000;

/// EDNS0 OPT pseudo-record (RFC 6891). Stored apart from the message
/// sections; the record form packs the payload size into the class field and
/// extended RCODE / version / flags into the TTL field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdnsOpt {
    pub udp_payload_size: u16,
    pub extended_rcode: u8,
    pub version: u8,
    pub flags: u16,
    pub data: Vec<u8>,
}

impl EdnsOpt {
    pub fn new() -> Self {
        EdnsOpt {
            udp_payload_size: 4096,
            extended_rcode: 0,
            version: 0,
            flags: 0,
            data: Vec::new(),
        }
    }

    pub fn dnssec_ok(&self) -> bool {
        self.flags & DO_FLAG != 0
    }

    pub fn set_dnssec_ok(&mut self, value: bool) {
        if value {
            self.flags |= DO_FLAG;
        } else {
            self.flags &= !DO_FLAG;
        }
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        if record.rtype != RecordType::OPT {
            return None;
        }
        Some(EdnsOpt {
            udp_payload_size: record.class.into(),
            extended_rcode: (record.ttl >> 24) as u8,
            version: (record.ttl >> 16) as u8,
            flags: (record.ttl & 0xFFFF) as u16,
            data: record.rdata.clone(),
        })
    }

    pub fn to_record(&self) -> Record {
        let ttl = ((self.extended_rcode as u32) << 24)
            | ((self.version as u32) << 16)
            | self.flags as u32;
        Record::new(
            Name::root(),
            RecordType::OPT,
            RecordClass::Unknown(self.udp_payload_size),
            ttl,
            self.data.clone(),
        )
    }
}

impl Default for EdnsOpt {
    fn default() -> Self {
        Self::new()
    }
}
