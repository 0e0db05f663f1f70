use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::enums::{RecordClass, RecordType};
use super::name::Name;
use super::wire::{self, PacketComponent, ParseError};

/// The question section entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: Name,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub fn new(name: Name, qtype: RecordType) -> Self {
        Question {
            name,
            qtype,
            qclass: RecordClass::IN,
        }
    }
}

impl PacketComponent for Question {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        wire::write_name(writer, &self.name)?;
        writer.write_var::<u16>(16, self.qtype.into())?;
        writer.write_var::<u16>(16, self.qclass.into())?;
        Ok(())
    }

    fn read<E: Endianness>(
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<Self, ParseError> {
        let name = wire::read_name(reader, packet)?;
        let qtype = reader.read_var::<u16>(16)?.into();
        let qclass = reader.read_var::<u16>(16)?.into();
        Ok(Question {
            name,
            qtype,
            qclass,
        })
    }
}
