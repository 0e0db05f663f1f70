use std::collections::HashMap;
use std::path::Path;

use base64::Engine;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::dns::{DnskeyRdata, DsRdata, Name, Record, RecordClass, RecordType};
use crate::error::ConfigError;

use super::message::{SRRset, SecurityStatus};

/// Configured trust anchors: DNSKEY or DS RRsets pre-marked SECURE, keyed by
/// (class, owner). Populated at configuration load, read-only afterwards.
pub struct TrustAnchorStore {
    anchors: RwLock<HashMap<(RecordClass, Name), SRRset>>,
}

impl TrustAnchorStore {
    /// An empty store; anchors come from a file or explicit adds
    pub fn new() -> Self {
        TrustAnchorStore {
            anchors: RwLock::new(HashMap::new()),
        }
    }

    /// A store seeded with the root KSKs
    pub fn with_root_anchors() -> Self {
        let store = TrustAnchorStore::new();
        store.add_root_anchors();
        store
    }

    fn add_root_anchors(&self) {
        // Root KSK-2024 (key tag 20326) and KSK-2017 (key tag 19036)
        for key_b64 in [
            "AwEAAaz/tAm8yTn4Mfeh5eyI96WSVexTBAvkMgJzkKTOiW1vkIbzxeF3\
             +/4RgWOq7HrxRixHlFlExOLAJr5emLvN7SWXgnLh4+B5xQlNVz8Og8kv\
             ArMtNROxVQuCaSnIDdD5LKyWbRd2n9WGe2R8PzgCmr3EgVLrjyBxWezF\
             0jLHwVN8efS3rCj/EWgvIWgb9tarpVUDK/b58Da+sqqls3eNbuv7pr+e\
             oZG+SrDK6nWeL3c6H5Apxz7LjVc1uTIdsIXxuOLYA4/ilBmSVIzuDWfd\
             RUfhHdY6+cn8HFRm+2hM8AnXGXws9555KrUB5qihylGa8subX2Nn6UwN\
             R1AkUTV74bU=",
            "AwEAAagAIKlVZrpC6Ia7gEzahOR+9W29euxhJhVVLOyQbSEW0O8gcCjF\
             FVQUTf6v58fLjwBd0YI0EzrAcQqBGCzh/RStIoO8g0NfnfL2MTJRkxoX\
             bfDaUeVPQuYEhg37NZWAJQ9VnMVDxP/VHL496M/QZxkjf5/Efucp2gaD\
             X6RS6CXpoY68LsvPVjR0ZSwzz1apAzvN9dlzEheX7ICJBBtuA6G3LQpz\
             W5hOA2hzCTMjJPJ8LbqF6dsV6DoBQzgul0sGIcGOYl7OyQdXfZ57relS\
             Qageu+ipAdTTJ25AsRTAoub8ONGcLmqrAmRLKBP1dfwhYB4N7knNnulq\
             QxA+Uk1ihz0=",
        ] {
            let normalized: String = key_b64.split_whitespace().collect();
            let public_key = base64::engine::general_purpose::STANDARD
                .decode(normalized)
                .expect("built-in root key is valid base64");
            let rdata = DnskeyRdata {
                flags: 257,
                protocol: 3,
                algorithm: 8,
                public_key,
            };
            self.add(Record::new(
                Name::root(),
                RecordType::DNSKEY,
                RecordClass::IN,
                172800,
                rdata.to_rdata(),
            ));
        }
    }

    /// Add one anchor record, merging into any set already present for its
    /// (class, owner). Only DNSKEY and DS records are meaningful here.
    pub fn add(&self, record: Record) {
        let key = (record.class, record.name.clone());
        let mut anchors = self.anchors.write();
        match anchors.get_mut(&key) {
            Some(set) if set.rtype() == record.rtype => set.push(record),
            Some(_) | None => {
                let mut set = SRRset::new(record);
                set.set_security(SecurityStatus::Secure);
                anchors.insert(key, set);
            }
        }
    }

    /// Longest-suffix anchor lookup: strip leftmost labels until a key
    /// matches; the root anchor matches everything.
    pub fn find(&self, name: &Name, class: RecordClass) -> Option<SRRset> {
        let anchors = self.anchors.read();
        let mut candidate = name.clone();
        loop {
            if let Some(set) = anchors.get(&(class, candidate.clone())) {
                return Some(set.clone());
            }
            candidate = candidate.parent()?;
        }
    }

    pub fn len(&self) -> usize {
        self.anchors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load anchors from a zone-file-format list of DS/DNSKEY lines
    pub fn load_file(&self, path: &Path) -> Result<usize, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut loaded = 0;
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.split(';').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let record = parse_anchor_line(line).map_err(|err| {
                ConfigError::AnchorFile(format!("{}:{}: {}", path.display(), lineno + 1, err))
            })?;
            self.add(record);
            loaded += 1;
        }
        info!(path = %path.display(), loaded, "loaded trust anchors");
        if loaded == 0 {
            debug!(path = %path.display(), "trust anchor file contained no anchors");
        }
        Ok(loaded)
    }
}

impl Default for TrustAnchorStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one `<owner> [ttl] [IN] DS|DNSKEY <fields...>` line
fn parse_anchor_line(line: &str) -> Result<Record, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return Err("too few fields".to_string());
    }

    let name = Name::parse(tokens[0]).map_err(|e| format!("bad owner name: {}", e))?;

    let mut idx = 1;
    let mut ttl = 3600u32;
    if let Ok(value) = tokens[idx].parse::<u32>() {
        ttl = value;
        idx += 1;
    }
    if tokens.get(idx).is_some_and(|t| t.eq_ignore_ascii_case("IN")) {
        idx += 1;
    }

    let rtype = tokens
        .get(idx)
        .ok_or_else(|| "missing record type".to_string())?;
    let fields = &tokens[idx + 1..];

    if rtype.eq_ignore_ascii_case("DS") {
        if fields.len() < 4 {
            return Err("DS needs key tag, algorithm, digest type and digest".to_string());
        }
        let key_tag = fields[0].parse::<u16>().map_err(|_| "bad key tag".to_string())?;
        let algorithm = fields[1].parse::<u8>().map_err(|_| "bad algorithm".to_string())?;
        let digest_type = fields[2]
            .parse::<u8>()
            .map_err(|_| "bad digest type".to_string())?;
        let digest_hex: String = fields[3..].concat();
        let digest = hex::decode(&digest_hex).map_err(|_| "bad digest hex".to_string())?;
        let rdata = DsRdata {
            key_tag,
            algorithm,
            digest_type,
            digest,
        };
        Ok(Record::new(name, RecordType::DS, RecordClass::IN, ttl, rdata.to_rdata()))
    } else if rtype.eq_ignore_ascii_case("DNSKEY") {
        if fields.len() < 4 {
            return Err("DNSKEY needs flags, protocol, algorithm and key".to_string());
        }
        let flags = fields[0].parse::<u16>().map_err(|_| "bad flags".to_string())?;
        let protocol = fields[1].parse::<u8>().map_err(|_| "bad protocol".to_string())?;
        let algorithm = fields[2].parse::<u8>().map_err(|_| "bad algorithm".to_string())?;
        let key_b64: String = fields[3..].concat();
        let public_key = base64::engine::general_purpose::STANDARD
            .decode(key_b64)
            .map_err(|_| "bad key base64".to_string())?;
        let rdata = DnskeyRdata {
            flags,
            protocol,
            algorithm,
            public_key,
        };
        Ok(Record::new(
            name,
            RecordType::DNSKEY,
            RecordClass::IN,
            ttl,
            rdata.to_rdata(),
        ))
    } else {
        Err(format!("unsupported anchor record type: {}", rtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn longest_suffix_lookup() {
        let store = TrustAnchorStore::new();
        store.add(Record::new(
            Name::parse("example.com").unwrap(),
            RecordType::DNSKEY,
            RecordClass::IN,
            3600,
            DnskeyRdata {
                flags: 257,
                protocol: 3,
                algorithm: 15,
                public_key: vec![0u8; 32],
            }
            .to_rdata(),
        ));

        let hit = store.find(&Name::parse("a.b.example.com").unwrap(), RecordClass::IN);
        assert_eq!(hit.unwrap().name(), &Name::parse("example.com").unwrap());

        assert!(store
            .find(&Name::parse("example.org").unwrap(), RecordClass::IN)
            .is_none());
        assert!(store
            .find(&Name::parse("example.com").unwrap(), RecordClass::CH)
            .is_none());
    }

    #[test]
    fn root_anchor_matches_everything() {
        let store = TrustAnchorStore::with_root_anchors();
        let hit = store.find(&Name::parse("deep.sub.example.net").unwrap(), RecordClass::IN);
        let set = hit.unwrap();
        assert!(set.name().is_root());
        assert_eq!(set.status(), SecurityStatus::Secure);
        assert_eq!(set.records().len(), 2);
    }

    #[test]
    fn parses_ds_line() {
        let record = parse_anchor_line(
            "example.ch. 3600 IN DS 12345 8 2 \
             1F987CC6583E92DF0890718C42",
        )
        .unwrap();
        assert_eq!(record.rtype, RecordType::DS);
        let ds = record.ds().unwrap();
        assert_eq!(ds.key_tag, 12345);
        assert_eq!(ds.algorithm, 8);
        assert_eq!(ds.digest_type, 2);
        assert_eq!(ds.digest, hex::decode("1F987CC6583E92DF0890718C42").unwrap());
    }

    #[test]
    fn parses_dnskey_line_without_ttl() {
        let record =
            parse_anchor_line("example.com. DNSKEY 257 3 15 AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")
                .unwrap();
        assert_eq!(record.rtype, RecordType::DNSKEY);
        let key = record.dnskey().unwrap();
        assert_eq!(key.flags, 257);
        assert_eq!(key.algorithm, 15);
        assert_eq!(key.public_key.len(), 32);
    }

    #[test]
    fn rejects_garbage_line() {
        assert!(parse_anchor_line("example.com. A 192.0.2.1").is_err());
        assert!(parse_anchor_line("nonsense").is_err());
    }

    #[test]
    fn loads_anchor_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "; root anchors for tests").unwrap();
        writeln!(file, "example.com. 3600 IN DS 1 8 2 00112233").unwrap();
        writeln!(
            file,
            "example.org. DNSKEY 256 3 15 AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        )
        .unwrap();

        let store = TrustAnchorStore::new();
        let loaded = store.load_file(file.path()).unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn bad_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "example.com. 3600 IN DS not-a-tag 8 2 00").unwrap();
        let store = TrustAnchorStore::new();
        assert!(store.load_file(file.path()).is_err());
    }
}
