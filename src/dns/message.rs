use bitstream_io::{BigEndian, BitReader, BitWriter};

use super::edns::EdnsOpt;
use super::enums::{RecordClass, RecordType};
use super::header::Header;
use super::name::Name;
use super::question::Question;
use super::record::Record;
use super::wire::{PacketComponent, ParseError};

/// A DNS message in close-to-wire form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    /// Build a recursive query for `(name, rtype)` with a random ID
    pub fn query(name: Name, rtype: RecordType) -> Self {
        let mut message = Message {
            header: Header {
                id: rand::random::<u16>(),
                rd: true,
                qdcount: 1,
                ..Header::default()
            },
            questions: vec![Question::new(name, rtype)],
            ..Message::default()
        };
        message.update_counts();
        message
    }

    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    pub fn qname(&self) -> Option<&Name> {
        self.questions.first().map(|q| &q.name)
    }

    pub fn qtype(&self) -> Option<RecordType> {
        self.questions.first().map(|q| q.qtype)
    }

    pub fn qclass(&self) -> Option<RecordClass> {
        self.questions.first().map(|q| q.qclass)
    }

    /// The OPT pseudo-record from the additional section, if present
    pub fn edns(&self) -> Option<EdnsOpt> {
        self.additionals
            .iter()
            .find(|r| r.rtype == RecordType::OPT)
            .and_then(EdnsOpt::from_record)
    }

    /// Replace (or add) the OPT pseudo-record
    pub fn set_edns(&mut self, opt: EdnsOpt) {
        self.additionals.retain(|r| r.rtype != RecordType::OPT);
        self.additionals.push(opt.to_record());
        self.update_counts();
    }

    pub fn update_counts(&mut self) {
        self.header.qdcount = self.questions.len() as u16;
        self.header.ancount = self.answers.len() as u16;
        self.header.nscount = self.authorities.len() as u16;
        self.header.arcount = self.additionals.len() as u16;
    }

    pub fn from_wire(buf: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BitReader::endian(buf, BigEndian);
        let header = Header::read(&mut reader, buf)?;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            questions.push(Question::read(&mut reader, buf)?);
        }
        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            answers.push(Record::read(&mut reader, buf)?);
        }
        let mut authorities = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            authorities.push(Record::read(&mut reader, buf)?);
        }
        let mut additionals = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            additionals.push(Record::read(&mut reader, buf)?);
        }

        Ok(Message {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, ParseError> {
        let mut message = self.clone();
        message.update_counts();

        let mut buf = Vec::with_capacity(512);
        {
            let mut writer = BitWriter::endian(&mut buf, BigEndian);
            message.header.write(&mut writer)?;
            for question in &message.questions {
                question.write(&mut writer)?;
            }
            for record in message
                .answers
                .iter()
                .chain(&message.authorities)
                .chain(&message.additionals)
            {
                record.write(&mut writer)?;
            }
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        let mut message = Message::query(Name::parse("www.example.com").unwrap(), RecordType::A);
        message.header.qr = true;
        message.answers.push(Record::new(
            Name::parse("www.example.com").unwrap(),
            RecordType::A,
            RecordClass::IN,
            300,
            vec![192, 0, 2, 1],
        ));
        message.authorities.push(Record::new(
            Name::parse("example.com").unwrap(),
            RecordType::NS,
            RecordClass::IN,
            3600,
            Name::parse("ns1.example.com").unwrap().wire(),
        ));
        let mut opt = EdnsOpt::new();
        opt.set_dnssec_ok(true);
        message.set_edns(opt);
        message
    }

    #[test]
    fn wire_round_trip() {
        let message = sample_message();
        let wire = message.to_wire().unwrap();
        let parsed = Message::from_wire(&wire).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn edns_accessor() {
        let message = sample_message();
        let opt = message.edns().unwrap();
        assert!(opt.dnssec_ok());
    }

    #[test]
    fn query_has_question() {
        let query = Message::query(Name::parse("example.org").unwrap(), RecordType::AAAA);
        assert_eq!(query.qtype(), Some(RecordType::AAAA));
        assert_eq!(query.header.qdcount, 1);
        assert!(query.header.rd);
    }

    #[test]
    fn parses_compressed_response() {
        // Hand-built response using a compression pointer for the answer owner
        let mut wire = Vec::new();
        // header: id=1, qr, rcode=0, qd=1, an=1
        wire.extend_from_slice(&[0x00, 0x01, 0x80, 0x00, 0x00, 0x01, 0x00, 0x01, 0, 0, 0, 0]);
        // question: example.com A IN (name at offset 12)
        wire.extend_from_slice(&[7]);
        wire.extend_from_slice(b"example");
        wire.extend_from_slice(&[3]);
        wire.extend_from_slice(b"com");
        wire.extend_from_slice(&[0, 0, 1, 0, 1]);
        // answer: pointer to offset 12, A IN ttl=60 rdata=1.2.3.4
        wire.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4, 1, 2, 3, 4]);

        let parsed = Message::from_wire(&wire).unwrap();
        assert_eq!(
            parsed.answers[0].name,
            Name::parse("example.com").unwrap()
        );
        assert_eq!(parsed.answers[0].rdata, vec![1, 2, 3, 4]);
    }
}
