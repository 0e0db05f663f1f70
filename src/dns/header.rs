use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::wire::{PacketComponent, ParseError};

/// DNS message header with the flag bits broken out, AD and CD included
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: bool,
    pub ad: bool,
    pub cd: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl PacketComponent for Header {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        writer.write_var::<u16>(16, self.id)?;
        writer.write_var::<u8>(1, self.qr as u8)?;
        writer.write_var::<u8>(4, self.opcode)?;
        writer.write_var::<u8>(1, self.aa as u8)?;
        writer.write_var::<u8>(1, self.tc as u8)?;
        writer.write_var::<u8>(1, self.rd as u8)?;
        writer.write_var::<u8>(1, self.ra as u8)?;
        writer.write_var::<u8>(1, self.z as u8)?;
        writer.write_var::<u8>(1, self.ad as u8)?;
        writer.write_var::<u8>(1, self.cd as u8)?;
        writer.write_var::<u8>(4, self.rcode)?;
        writer.write_var::<u16>(16, self.qdcount)?;
        writer.write_var::<u16>(16, self.ancount)?;
        writer.write_var::<u16>(16, self.nscount)?;
        writer.write_var::<u16>(16, self.arcount)?;
        Ok(())
    }

    fn read<E: Endianness>(
        reader: &mut BitReader<&[u8], E>,
        _packet: &[u8],
    ) -> Result<Self, ParseError> {
        Ok(Header {
            id: reader.read_var::<u16>(16)?,
            qr: reader.read_var::<u8>(1)? == 1,
            opcode: reader.read_var::<u8>(4)?,
            aa: reader.read_var::<u8>(1)? == 1,
            tc: reader.read_var::<u8>(1)? == 1,
            rd: reader.read_var::<u8>(1)? == 1,
            ra: reader.read_var::<u8>(1)? == 1,
            z: reader.read_var::<u8>(1)? == 1,
            ad: reader.read_var::<u8>(1)? == 1,
            cd: reader.read_var::<u8>(1)? == 1,
            rcode: reader.read_var::<u8>(4)?,
            qdcount: reader.read_var::<u16>(16)?,
            ancount: reader.read_var::<u16>(16)?,
            nscount: reader.read_var::<u16>(16)?,
            arcount: reader.read_var::<u16>(16)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream_io::BigEndian;

    #[test]
    fn header_round_trip() {
        let header = Header {
            id: 0x1234,
            qr: true,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: true,
            z: false,
            ad: true,
            cd: false,
            rcode: 3,
            qdcount: 1,
            ancount: 2,
            nscount: 3,
            arcount: 4,
        };

        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::endian(&mut buf, BigEndian);
            header.write(&mut writer).unwrap();
        }
        assert_eq!(buf.len(), 12);

        let mut reader = BitReader::endian(&buf[..], BigEndian);
        let parsed = Header::read(&mut reader, &buf).unwrap();
        assert_eq!(parsed, header);
    }
}
