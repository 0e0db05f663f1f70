use tracing::debug;

use crate::dns::{
    EdnsOpt, Header, Message, Name, Question, Record, RecordClass, RecordType, RrsigRdata,
};

/// RFC 4033 validator verdicts, plus the pre-validation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityStatus {
    #[default]
    Unchecked,
    Bogus,
    Insecure,
    Secure,
    Indeterminate,
}

/// An RRset with its covering RRSIGs and a security verdict.
///
/// All records share owner, type and class; the effective TTL is the
/// minimum seen. The verdict is written once during validation.
#[derive(Debug, Clone)]
pub struct SRRset {
    records: Vec<Record>,
    sigs: Vec<Record>,
    /// Type covered, tracked while a set holds only signatures
    sig_covered: Option<RecordType>,
    status: SecurityStatus,
    bogus_reason: Option<String>,
    wildcard_source: Option<Name>,
}

impl SRRset {
    pub fn new(record: Record) -> Self {
        SRRset {
            records: vec![record],
            sigs: Vec::new(),
            sig_covered: None,
            status: SecurityStatus::Unchecked,
            bogus_reason: None,
            wildcard_source: None,
        }
    }

    pub fn from_records(records: Vec<Record>) -> Option<Self> {
        let mut iter = records.into_iter();
        let mut set = SRRset::new(iter.next()?);
        for record in iter {
            set.push(record);
        }
        Some(set)
    }

    pub fn push(&mut self, record: Record) {
        debug_assert!(self.accepts(&record.name, record.rtype, record.class));
        self.records.push(record);
    }

    pub fn add_sig(&mut self, sig: Record) {
        self.sigs.push(sig);
    }

    pub fn name(&self) -> &Name {
        &self.records[0].name
    }

    pub fn rtype(&self) -> RecordType {
        self.records[0].rtype
    }

    pub fn class(&self) -> RecordClass {
        self.records[0].class
    }

    /// Minimum TTL over data records and signatures
    pub fn ttl(&self) -> u32 {
        self.records
            .iter()
            .chain(&self.sigs)
            .map(|r| r.ttl)
            .min()
            .unwrap_or(0)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn sigs(&self) -> &[Record] {
        &self.sigs
    }

    /// Parsed covering signatures, skipping malformed ones
    pub fn rrsigs(&self) -> Vec<RrsigRdata> {
        self.sigs.iter().filter_map(|s| s.rrsig().ok()).collect()
    }

    /// The signer name shared by this set's signatures, if signed
    pub fn signer(&self) -> Option<Name> {
        self.rrsigs().into_iter().next().map(|sig| sig.signer)
    }

    pub fn accepts(&self, name: &Name, rtype: RecordType, class: RecordClass) -> bool {
        self.name() == name && self.rtype() == rtype && self.class() == class
    }

    pub fn status(&self) -> SecurityStatus {
        self.status
    }

    pub fn set_security(&mut self, status: SecurityStatus) {
        self.status = status;
    }

    pub fn set_bogus(&mut self, reason: &str) {
        self.status = SecurityStatus::Bogus;
        self.bogus_reason = Some(reason.to_string());
    }

    pub fn bogus_reason(&self) -> Option<&str> {
        self.bogus_reason.as_deref()
    }

    /// Set when the proving RRSIG showed wildcard synthesis; holds the
    /// unexpanded `*.<closest encloser>` source
    pub fn wildcard_source(&self) -> Option<&Name> {
        self.wildcard_source.as_ref()
    }

    pub fn set_wildcard_source(&mut self, source: Name) {
        self.wildcard_source = Some(source);
    }
}

/// Message sections holding RRsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

impl Section {
    fn index(self) -> usize {
        match self {
            Section::Answer => 0,
            Section::Authority => 1,
            Section::Additional => 2,
        }
    }
}

/// A DNS message regrouped into SRRsets for validation. The OPT record is
/// held apart from the sections.
#[derive(Debug, Clone)]
pub struct SMessage {
    pub header: Header,
    question: Option<Question>,
    edns: Option<EdnsOpt>,
    sections: [Vec<SRRset>; 3],
    status: SecurityStatus,
    reason: Option<String>,
}

impl SMessage {
    pub fn from_message(message: &Message) -> Self {
        let mut smessage = SMessage {
            header: message.header.clone(),
            question: message.questions.first().cloned(),
            edns: message.edns(),
            sections: [Vec::new(), Vec::new(), Vec::new()],
            status: SecurityStatus::Unchecked,
            reason: None,
        };

        let section_records = [
            (Section::Answer, &message.answers),
            (Section::Authority, &message.authorities),
            (Section::Additional, &message.additionals),
        ];
        for (section, records) in section_records {
            for record in records.iter() {
                smessage.insert(section, record);
            }
        }
        // A signature without its data RRset proves nothing; drop such sets
        for rrsets in &mut smessage.sections {
            rrsets.retain(|set| {
                if set.records.is_empty() {
                    debug!("dropping orphaned RRSIG set");
                }
                !set.records.is_empty()
            });
        }
        smessage
    }

    fn insert(&mut self, section: Section, record: &Record) {
        if record.rtype == RecordType::OPT {
            return;
        }

        let rrsets = &mut self.sections[section.index()];
        if record.rtype == RecordType::RRSIG {
            let Ok(rrsig) = record.rrsig() else {
                debug!("ignoring malformed RRSIG at {}", record.name);
                return;
            };
            let covered = rrsig.type_covered;
            if let Some(set) = rrsets
                .iter_mut()
                .find(|s| s.key_matches(&record.name, covered, record.class))
            {
                set.add_sig(record.clone());
            } else {
                rrsets.push(SRRset::sig_only(record.clone(), covered));
            }
            return;
        }

        // Data records either join an existing set (including one created by
        // a signature that arrived first) or open a new one
        if let Some(set) = rrsets
            .iter_mut()
            .find(|s| s.key_matches(&record.name, record.rtype, record.class))
        {
            set.records.push(record.clone());
        } else {
            rrsets.push(SRRset::new(record.clone()));
        }
    }

    pub fn question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    pub fn qname(&self) -> Option<&Name> {
        self.question.as_ref().map(|q| &q.name)
    }

    pub fn qtype(&self) -> Option<RecordType> {
        self.question.as_ref().map(|q| q.qtype)
    }

    pub fn qclass(&self) -> Option<RecordClass> {
        self.question.as_ref().map(|q| q.qclass)
    }

    pub fn edns(&self) -> Option<&EdnsOpt> {
        self.edns.as_ref()
    }

    /// Effective RCODE including the EDNS extension bits
    pub fn rcode(&self) -> u16 {
        let mut rcode = self.header.rcode as u16;
        if let Some(opt) = &self.edns {
            rcode |= (opt.extended_rcode as u16) << 4;
        }
        rcode
    }

    pub fn section(&self, section: Section) -> &[SRRset] {
        &self.sections[section.index()]
    }

    pub fn section_mut(&mut self, section: Section) -> &mut Vec<SRRset> {
        &mut self.sections[section.index()]
    }

    pub fn find_rrset(
        &self,
        section: Section,
        name: &Name,
        rtype: RecordType,
    ) -> Option<&SRRset> {
        self.section(section)
            .iter()
            .find(|s| s.name() == name && s.rtype() == rtype)
    }

    pub fn status(&self) -> SecurityStatus {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn set_status(&mut self, status: SecurityStatus, reason: Option<String>) {
        self.status = status;
        self.reason = reason;
    }

    /// Flatten back to wire form, re-attaching signatures and the OPT record
    pub fn to_message(&self) -> Message {
        let mut message = Message {
            header: self.header.clone(),
            questions: self.question.iter().cloned().collect(),
            ..Message::default()
        };
        for (section, out) in [
            (Section::Answer, 0usize),
            (Section::Authority, 1),
            (Section::Additional, 2),
        ] {
            for set in self.section(section) {
                let target = match out {
                    0 => &mut message.answers,
                    1 => &mut message.authorities,
                    _ => &mut message.additionals,
                };
                target.extend(set.records.iter().cloned());
                target.extend(set.sigs.iter().cloned());
            }
        }
        if let Some(opt) = &self.edns {
            message.additionals.push(opt.to_record());
        }
        message.update_counts();
        message
    }
}

impl SRRset {
    fn sig_only(sig: Record, covered: RecordType) -> Self {
        SRRset {
            records: Vec::new(),
            sigs: vec![sig],
            sig_covered: Some(covered),
            status: SecurityStatus::Unchecked,
            bogus_reason: None,
            wildcard_source: None,
        }
    }

    fn key_matches(&self, name: &Name, rtype: RecordType, class: RecordClass) -> bool {
        if let Some(first) = self.records.first() {
            return &first.name == name && first.rtype == rtype && first.class == class;
        }
        if let Some(sig) = self.sigs.first() {
            return &sig.name == name
                && self.sig_covered == Some(rtype)
                && sig.class == class;
        }
        false
    }
}
