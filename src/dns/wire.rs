use bitstream_io::{BitRead, BitReader, BitWrite, BitWriter, Endianness};
use thiserror::Error;

use super::name::Name;

/// Maximum compression pointer indirections tolerated in one name
const MAX_POINTER_JUMPS: usize = 16;

/// Wire-format parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid DNS header")]
    InvalidHeader,
    #[error("Invalid DNS label")]
    InvalidLabel,
    #[error("Domain name too long")]
    NameTooLong,
    #[error("Compression pointer loop")]
    PointerLoop,
    #[error("Truncated record data")]
    TruncatedRdata,
    #[error("Invalid record data for type {0}")]
    InvalidRdata(&'static str),
    #[error("Unexpected end of packet")]
    UnexpectedEof,
}

impl From<std::io::Error> for ParseError {
    fn from(_: std::io::Error) -> Self {
        ParseError::UnexpectedEof
    }
}

/// A component of a DNS packet that knows its own wire form.
///
/// Readers get the whole packet buffer alongside the bit reader so that
/// compression pointers in names can be chased.
pub trait PacketComponent: Sized {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    fn read<E: Endianness>(
        reader: &mut BitReader<&[u8], E>,
        packet: &[u8],
    ) -> Result<Self, ParseError>;
}

/// Read a name at the reader's current position, following compression
/// pointers into `packet`.
pub fn read_name<E: Endianness>(
    reader: &mut BitReader<&[u8], E>,
    packet: &[u8],
) -> Result<Name, ParseError> {
    let mut labels = Vec::new();

    loop {
        let len = reader.read_var::<u8>(8)?;

        if len == 0 {
            break;
        }

        if (len & 0xC0) == 0xC0 {
            let low = reader.read_var::<u8>(8)?;
            let pointer = (((len as u16) & 0x3F) << 8) | low as u16;
            let (pointed, _) = parse_name_at(packet, pointer as usize)?;
            labels.extend(pointed);
            break;
        }

        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }

        let mut buf = vec![0u8; len as usize];
        reader.read_bytes(&mut buf)?;
        let label = String::from_utf8(buf).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);

        if labels.len() > 128 {
            return Err(ParseError::NameTooLong);
        }
    }

    Name::from_labels(labels)
}

/// Parse a name starting at `pos` in `packet`, following compression
/// pointers. Returns the labels and the offset just past the name at `pos`.
pub fn parse_name_at(packet: &[u8], pos: usize) -> Result<(Vec<String>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut cursor = pos;
    let mut end_of_name = None;
    let mut jumps = 0;

    loop {
        let len = *packet.get(cursor).ok_or(ParseError::UnexpectedEof)? as usize;

        if len == 0 {
            cursor += 1;
            break;
        }

        if (len & 0xC0) == 0xC0 {
            let low = *packet.get(cursor + 1).ok_or(ParseError::UnexpectedEof)? as usize;
            let target = ((len & 0x3F) << 8) | low;
            if end_of_name.is_none() {
                end_of_name = Some(cursor + 2);
            }
            // Pointers must go backwards; forward pointers would allow loops
            if target >= cursor {
                return Err(ParseError::PointerLoop);
            }
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(ParseError::PointerLoop);
            }
            cursor = target;
            continue;
        }

        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }

        let start = cursor + 1;
        let end = start + len;
        let bytes = packet.get(start..end).ok_or(ParseError::UnexpectedEof)?;
        let label = String::from_utf8(bytes.to_vec()).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);
        cursor = end;

        if labels.len() > 128 {
            return Err(ParseError::NameTooLong);
        }
    }

    Ok((labels, end_of_name.unwrap_or(cursor)))
}

/// Write a name uncompressed: length-prefixed labels plus the root byte.
pub fn write_name<E: Endianness>(
    writer: &mut BitWriter<&mut Vec<u8>, E>,
    name: &Name,
) -> Result<(), ParseError> {
    for label in name.labels() {
        if label.is_empty() || label.len() > 63 {
            return Err(ParseError::InvalidLabel);
        }
        writer.write_var::<u8>(8, label.len() as u8)?;
        writer.write_bytes(label.as_bytes())?;
    }
    writer.write_var::<u8>(8, 0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uncompressed_name() {
        let buf = [3, b'w', b'w', b'w', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0];
        let (labels, end) = parse_name_at(&buf, 0).unwrap();
        assert_eq!(labels, vec!["www".to_string(), "example".to_string()]);
        assert_eq!(end, buf.len());
    }

    #[test]
    fn follows_compression_pointer() {
        // "example" at 0, "www" + pointer to 0 at offset 9
        let buf = [
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0, // offset 0..9
            3, b'w', b'w', b'w', 0xC0, 0x00, // offset 9..15
        ];
        let (labels, end) = parse_name_at(&buf, 9).unwrap();
        assert_eq!(labels, vec!["www".to_string(), "example".to_string()]);
        assert_eq!(end, 15);
    }

    #[test]
    fn rejects_forward_pointer() {
        let buf = [0xC0, 0x04, 0, 0, 0];
        assert_eq!(parse_name_at(&buf, 0), Err(ParseError::PointerLoop));
    }

    #[test]
    fn rejects_oversized_label() {
        let mut buf = vec![64u8];
        buf.extend(std::iter::repeat(b'a').take(64));
        buf.push(0);
        assert_eq!(parse_name_at(&buf, 0), Err(ParseError::InvalidLabel));
    }
}
