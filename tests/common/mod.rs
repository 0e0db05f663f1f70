//! Shared fixtures: miniature signed zones built at test time with
//! Ed25519 keys, and a priming resolver that replays canned messages.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};

use vordr::config::ValidatorConfig;
use vordr::dns::{
    DnskeyRdata, DsRdata, EdnsOpt, Message, Name, Nsec3Rdata, NsecRdata, Record, RecordClass,
    RecordType, RrsigRdata, TypeBitmap,
};
use vordr::dnssec::canonical::signed_data;
use vordr::dnssec::keys::ds_digest;
use vordr::dnssec::message::SRRset;
use vordr::dnssec::nsec3::{encode_hash, hash_name};
use vordr::dnssec::{DigestType, TrustAnchorStore};
use vordr::error::TransportError;
use vordr::resolver::{PrimingResolver, ValidatingResolver};

/// Fixed validation clock; signatures are built around it
pub const TEST_TIME: u64 = 1_700_000_000;

pub fn name(s: &str) -> Name {
    Name::parse(s).unwrap()
}

/// One zone's Ed25519 signing key with DNSKEY/DS/RRSIG builders
pub struct ZoneKey {
    pub owner: Name,
    keypair: Ed25519KeyPair,
    pub dnskey: DnskeyRdata,
}

impl ZoneKey {
    pub fn new(owner: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).expect("keygen");
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).expect("key load");
        let dnskey = DnskeyRdata {
            flags: 257,
            protocol: 3,
            algorithm: 15,
            public_key: keypair.public_key().as_ref().to_vec(),
        };
        ZoneKey {
            owner: name(owner),
            keypair,
            dnskey,
        }
    }

    pub fn dnskey_record(&self) -> Record {
        Record::new(
            self.owner.clone(),
            RecordType::DNSKEY,
            RecordClass::IN,
            3600,
            self.dnskey.to_rdata(),
        )
    }

    pub fn ds_record(&self) -> Record {
        let digest = ds_digest(&self.owner, &self.dnskey, DigestType::Sha256).unwrap();
        let ds = DsRdata {
            key_tag: self.dnskey.key_tag(),
            algorithm: self.dnskey.algorithm,
            digest_type: 2,
            digest,
        };
        Record::new(
            self.owner.clone(),
            RecordType::DS,
            RecordClass::IN,
            3600,
            ds.to_rdata(),
        )
    }

    /// Sign one RRset; all records must share owner, type and class
    pub fn sign(&self, records: &[Record]) -> Record {
        self.sign_with_labels(records, records[0].name.label_count() as u8)
    }

    /// Sign with an explicit RRSIG label count, for wildcard-synthesized
    /// answers
    pub fn sign_with_labels(&self, records: &[Record], labels: u8) -> Record {
        let rrset = SRRset::from_records(records.to_vec()).unwrap();
        let mut rrsig = RrsigRdata {
            type_covered: records[0].rtype,
            algorithm: 15,
            labels,
            original_ttl: records[0].ttl,
            expiration: (TEST_TIME + 86_400) as u32,
            inception: (TEST_TIME - 86_400) as u32,
            key_tag: self.dnskey.key_tag(),
            signer: self.owner.clone(),
            signature: Vec::new(),
        };
        let data = signed_data(&rrset, &rrsig);
        rrsig.signature = self.keypair.sign(&data).as_ref().to_vec();
        Record::new(
            records[0].name.clone(),
            RecordType::RRSIG,
            RecordClass::IN,
            records[0].ttl,
            rrsig.to_rdata(),
        )
    }

    /// An RRset plus its signature, ready for a message section
    pub fn signed(&self, records: &[Record]) -> Vec<Record> {
        let mut out = records.to_vec();
        out.push(self.sign(records));
        out
    }
}

pub fn a_record(owner: &str) -> Record {
    Record::new(
        name(owner),
        RecordType::A,
        RecordClass::IN,
        300,
        vec![192, 0, 2, 1],
    )
}

pub fn cname_record(owner: &str, target: &str) -> Record {
    Record::new(
        name(owner),
        RecordType::CNAME,
        RecordClass::IN,
        300,
        name(target).wire(),
    )
}

pub fn ns_record(owner: &str, target: &str) -> Record {
    Record::new(
        name(owner),
        RecordType::NS,
        RecordClass::IN,
        3600,
        name(target).wire(),
    )
}

pub fn soa_record(zone: &str) -> Record {
    let mut rdata = name(&format!("ns1.{}", zone)).wire();
    rdata.extend(name(&format!("hostmaster.{}", zone)).wire());
    rdata.extend_from_slice(&1u32.to_be_bytes());
    rdata.extend_from_slice(&7200u32.to_be_bytes());
    rdata.extend_from_slice(&3600u32.to_be_bytes());
    rdata.extend_from_slice(&604800u32.to_be_bytes());
    rdata.extend_from_slice(&300u32.to_be_bytes());
    Record::new(name(zone), RecordType::SOA, RecordClass::IN, 300, rdata)
}

pub fn nsec_record(owner: &str, next: &str, types: &[RecordType]) -> Record {
    let rdata = NsecRdata {
        next: name(next),
        types: TypeBitmap::from_types(types),
    };
    Record::new(name(owner), RecordType::NSEC, RecordClass::IN, 300, rdata.to_rdata())
}

/// Builder for a zone's NSEC3 ring: hashes the given plain names, chains
/// them in hash order and emits one record per name.
pub struct Nsec3Chain {
    zone: Name,
    salt: Vec<u8>,
    iterations: u16,
    opt_out: bool,
    names: Vec<(Name, Vec<RecordType>)>,
}

impl Nsec3Chain {
    pub fn new(zone: &str) -> Self {
        Nsec3Chain {
            zone: name(zone),
            salt: vec![0xAA, 0xBB],
            iterations: 10,
            opt_out: false,
            names: Vec::new(),
        }
    }

    pub fn iterations(mut self, iterations: u16) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn opt_out(mut self, opt_out: bool) -> Self {
        self.opt_out = opt_out;
        self
    }

    pub fn push(mut self, owner: &str, types: &[RecordType]) -> Self {
        self.names.push((name(owner), types.to_vec()));
        self
    }

    pub fn records(&self) -> Vec<Record> {
        let mut hashed: Vec<(Vec<u8>, &[RecordType])> = self
            .names
            .iter()
            .map(|(n, types)| {
                (
                    hash_name(n, 1, self.iterations, &self.salt).unwrap(),
                    types.as_slice(),
                )
            })
            .collect();
        hashed.sort_by(|a, b| a.0.cmp(&b.0));

        hashed
            .iter()
            .enumerate()
            .map(|(i, (hash, types))| {
                let next = hashed[(i + 1) % hashed.len()].0.clone();
                let owner = Name::parse(&format!("{}.{}", encode_hash(hash), self.zone)).unwrap();
                let rdata = Nsec3Rdata {
                    hash_algorithm: 1,
                    flags: if self.opt_out { 1 } else { 0 },
                    iterations: self.iterations,
                    salt: self.salt.clone(),
                    next_hashed: next,
                    types: TypeBitmap::from_types(types),
                };
                Record::new(owner, RecordType::NSEC3, RecordClass::IN, 300, rdata.to_rdata())
            })
            .collect()
    }
}

/// A response skeleton for (qname, qtype) with QR set and DNSSEC records
/// intact
pub fn response(qname: &str, qtype: RecordType, rcode: u8) -> Message {
    let mut message = Message::query(name(qname), qtype);
    message.header.qr = true;
    message.header.ra = true;
    message.header.rcode = rcode;
    let mut opt = EdnsOpt::new();
    opt.set_dnssec_ok(true);
    message.set_edns(opt);
    message
}

/// Replays canned messages keyed by (qname, qtype); records every query it
/// sees for assertions on egress flags.
#[derive(Default)]
pub struct StubResolver {
    responses: Mutex<HashMap<(Name, u16), Message>>,
    pub queries: Mutex<Vec<Message>>,
}

impl StubResolver {
    pub fn new() -> Self {
        StubResolver::default()
    }

    pub fn add(&self, message: Message) {
        let question = message.question().expect("canned response needs a question");
        let key = (question.name.clone(), question.qtype.into());
        self.responses.lock().unwrap().insert(key, message);
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl PrimingResolver for StubResolver {
    async fn send(&self, query: &Message) -> Result<Message, TransportError> {
        self.queries.lock().unwrap().push(query.clone());
        let question = query.question().expect("query without question");
        let key = (question.name.clone(), question.qtype.into());
        match self.responses.lock().unwrap().get(&key) {
            Some(message) => {
                let mut reply = message.clone();
                reply.header.id = query.header.id;
                Ok(reply)
            }
            None => Err(TransportError::Upstream(format!(
                "no canned response for {} {}",
                question.name, question.qtype
            ))),
        }
    }
}

pub fn anchor_store(keys: &[&ZoneKey]) -> Arc<TrustAnchorStore> {
    let store = TrustAnchorStore::new();
    for key in keys {
        store.add(key.dnskey_record());
    }
    Arc::new(store)
}

/// Opt-in log output for debugging test failures (`RUST_LOG=vordr=trace`)
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// A facade wired to the stub with the validation clock pinned
pub fn test_resolver(stub: Arc<StubResolver>, store: Arc<TrustAnchorStore>) -> ValidatingResolver {
    init_tracing();
    let mut config = ValidatorConfig::default();
    config.use_root_anchors = false;
    let mut resolver = ValidatingResolver::with_trust_anchors(stub, store, config);
    resolver.set_current_time(TEST_TIME);
    resolver
}

/// A client query that asks for authenticated data
pub fn client_query(qname: &str, qtype: RecordType) -> Message {
    let mut query = Message::query(name(qname), qtype);
    let mut opt = EdnsOpt::new();
    opt.set_dnssec_ok(true);
    query.set_edns(opt);
    query
}
