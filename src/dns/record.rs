use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::enums::{RecordClass, RecordType};
use super::name::Name;
use super::rdata::{DnskeyRdata, DsRdata, Nsec3Rdata, NsecRdata, RrsigRdata};
use super::wire::{self, PacketComponent, ParseError};

/// One resource record. RDATA is kept as raw bytes; the DNSSEC-relevant
/// types get typed views on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: Name,
    pub rtype: RecordType,
    pub class: RecordClass,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl Record {
    pub fn new(name: Name, rtype: RecordType, class: RecordClass, ttl: u32, rdata: Vec<u8>) -> Self {
        Record {
            name,
            rtype,
            class,
            ttl,
            rdata,
        }
    }

    pub fn rrsig(&self) -> Result<RrsigRdata, ParseError> {
        if self.rtype != RecordType::RRSIG {
            return Err(ParseError::InvalidRdata("RRSIG"));
        }
        RrsigRdata::parse(&self.rdata)
    }

    pub fn dnskey(&self) -> Result<DnskeyRdata, ParseError> {
        if self.rtype != RecordType::DNSKEY {
            return Err(ParseError::InvalidRdata("DNSKEY"));
        }
        DnskeyRdata::parse(&self.rdata)
    }

    pub fn ds(&self) -> Result<DsRdata, ParseError> {
        if self.rtype != RecordType::DS {
            return Err(ParseError::InvalidRdata("DS"));
        }
        DsRdata::parse(&self.rdata)
    }

    pub fn nsec(&self) -> Result<NsecRdata, ParseError> {
        if self.rtype != RecordType::NSEC {
            return Err(ParseError::InvalidRdata("NSEC"));
        }
        NsecRdata::parse(&self.rdata)
    }

    pub fn nsec3(&self) -> Result<Nsec3Rdata, ParseError> {
        if self.rtype != RecordType::NSEC3 {
            return Err(ParseError::InvalidRdata("NSEC3"));
        }
        Nsec3Rdata::parse(&self.rdata)
    }
}

impl PacketComponent for Record {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        wire::write_name(writer, &self.name)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.class.into())?;
        writer.write_var::<u32>(32, self.ttl)?;
        writer.write_var::<u16>(16, self.rdata.len() as u16)?;
        writer.write_bytes(&self.rdata)?;
        Ok(())
    }

    fn read<E: Endianness>(
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<Self, ParseError> {
        let name = wire::read_name(reader, packet)?;
        let rtype = reader.read_var::<u16>(16)?.into();
        let class = reader.read_var::<u16>(16)?.into();
        let ttl = reader.read_var::<u32>(32)?;
        let rdlength = reader.read_var::<u16>(16)? as usize;
        let mut rdata = vec![0u8; rdlength];
        reader.read_bytes(&mut rdata)?;
        Ok(Record {
            name,
            rtype,
            class,
            ttl,
            rdata,
        })
    }
}
