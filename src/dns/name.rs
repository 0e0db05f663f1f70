use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use super::wire::ParseError;

/// A DNS name: an ordered label sequence, leftmost label first.
///
/// Equality and hashing are case-insensitive; the stored labels keep their
/// original case for wire round-trips.
#[derive(Debug, Clone, Default)]
pub struct Name {
    labels: Vec<String>,
}

impl Name {
    /// The root name (zero labels)
    pub fn root() -> Self {
        Name { labels: Vec::new() }
    }

    /// Build a name from pre-split labels, validating label and name limits.
    pub fn from_labels(labels: Vec<String>) -> Result<Self, ParseError> {
        let mut wire_len = 1;
        for label in &labels {
            if label.is_empty() || label.len() > 63 {
                return Err(ParseError::InvalidLabel);
            }
            wire_len += 1 + label.len();
        }
        if wire_len > 255 {
            return Err(ParseError::NameTooLong);
        }
        Ok(Name { labels })
    }

    /// Parse a name in presentation format. A trailing dot is accepted and
    /// ignored; `""` and `"."` are the root.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.strip_suffix('.').unwrap_or(s);
        if s.is_empty() {
            return Ok(Name::root());
        }
        Name::from_labels(s.split('.').map(str::to_string).collect())
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of labels, excluding the root
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The leftmost label, if any
    pub fn leftmost(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }

    /// The name with the leftmost label removed; `None` for the root
    pub fn parent(&self) -> Option<Name> {
        if self.labels.is_empty() {
            return None;
        }
        Some(Name {
            labels: self.labels[1..].to_vec(),
        })
    }

    /// Keep only the rightmost `count` labels
    pub fn suffix(&self, count: usize) -> Name {
        if count >= self.labels.len() {
            return self.clone();
        }
        Name {
            labels: self.labels[self.labels.len() - count..].to_vec(),
        }
    }

    /// Strip the `count` leftmost labels
    pub fn strip_labels(&self, count: usize) -> Name {
        self.suffix(self.labels.len().saturating_sub(count))
    }

    /// True if `self` is equal to or underneath `ancestor`
    pub fn is_subdomain_of(&self, ancestor: &Name) -> bool {
        if ancestor.labels.len() > self.labels.len() {
            return false;
        }
        self.common_labels(ancestor) == ancestor.labels.len()
    }

    /// Number of shared rightmost labels
    pub fn common_labels(&self, other: &Name) -> usize {
        let mut shared = 0;
        let mut a = self.labels.iter().rev();
        let mut b = other.labels.iter().rev();
        while let (Some(x), Some(y)) = (a.next(), b.next()) {
            if !x.eq_ignore_ascii_case(y) {
                break;
            }
            shared += 1;
        }
        shared
    }

    /// The deepest name both `self` and `other` are under
    pub fn longest_common_suffix(&self, other: &Name) -> Name {
        self.suffix(self.common_labels(other))
    }

    /// Prepend the `*` label; a wildcard stays itself
    pub fn to_wildcard(&self) -> Name {
        if self.is_wildcard() {
            return self.clone();
        }
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push("*".to_string());
        labels.extend(self.labels.iter().cloned());
        Name { labels }
    }

    pub fn is_wildcard(&self) -> bool {
        self.labels.first().is_some_and(|l| l == "*")
    }

    /// Uncompressed wire form, original case
    pub fn wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1);
        for label in &self.labels {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out
    }

    /// Uncompressed wire form, lowercased (RFC 4034 canonical form)
    pub fn canonical_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1);
        for label in &self.labels {
            out.push(label.len() as u8);
            out.extend(label.bytes().map(|b| b.to_ascii_lowercase()));
        }
        out.push(0);
        out
    }

    /// Canonical name ordering per RFC 4034 section 6.1: compare rightmost
    /// labels first, as lowercased byte strings; a proper ancestor sorts
    /// before its descendants.
    pub fn canonical_cmp(&self, other: &Name) -> Ordering {
        let mut a = self.labels.iter().rev();
        let mut b = other.labels.iter().rev();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(x), Some(y)) => {
                    let cmp = x
                        .bytes()
                        .map(|c| c.to_ascii_lowercase())
                        .cmp(y.bytes().map(|c| c.to_ascii_lowercase()));
                    if cmp != Ordering::Equal {
                        return cmp;
                    }
                }
            }
        }
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in &self.labels {
            for b in label.bytes() {
                state.write_u8(b.to_ascii_lowercase());
            }
            state.write_u8(0);
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return write!(f, ".");
        }
        for label in &self.labels {
            write!(f, "{}.", label)?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let name = Name::parse("www.Example.COM.").unwrap();
        assert_eq!(name.label_count(), 3);
        assert_eq!(name.to_string(), "www.Example.COM.");
        assert_eq!(Name::root().to_string(), ".");
        assert_eq!(Name::parse(".").unwrap(), Name::root());
    }

    #[test]
    fn case_insensitive_equality() {
        let a = Name::parse("example.com").unwrap();
        let b = Name::parse("EXAMPLE.Com").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn suffix_and_strip() {
        let name = Name::parse("a.b.example.com").unwrap();
        assert_eq!(name.suffix(2), Name::parse("example.com").unwrap());
        assert_eq!(name.strip_labels(1), Name::parse("b.example.com").unwrap());
        assert_eq!(name.suffix(0), Name::root());
        assert_eq!(name.suffix(10), name);
    }

    #[test]
    fn subdomain_checks() {
        let zone = Name::parse("example.com").unwrap();
        let host = Name::parse("www.example.com").unwrap();
        assert!(host.is_subdomain_of(&zone));
        assert!(zone.is_subdomain_of(&zone));
        assert!(host.is_subdomain_of(&Name::root()));
        assert!(!zone.is_subdomain_of(&host));
        assert!(!Name::parse("example.org").unwrap().is_subdomain_of(&zone));
    }

    #[test]
    fn common_suffix() {
        let a = Name::parse("a.x.example.com").unwrap();
        let b = Name::parse("b.x.Example.com").unwrap();
        assert_eq!(
            a.longest_common_suffix(&b),
            Name::parse("x.example.com").unwrap()
        );
    }

    #[test]
    fn wildcard_derivation() {
        let name = Name::parse("example.com").unwrap();
        let wc = name.to_wildcard();
        assert!(wc.is_wildcard());
        assert_eq!(wc.to_string(), "*.example.com.");
        assert_eq!(wc.to_wildcard(), wc);
    }

    #[test]
    fn canonical_ordering_rfc4034() {
        // Ordering example from RFC 4034 section 6.1
        let ordered = [
            "example",
            "a.example",
            "yljkjljk.a.example",
            "Z.a.example",
            "zABC.a.EXAMPLE",
            "z.example",
            "*.z.example",
        ];
        for pair in ordered.windows(2) {
            let a = Name::parse(pair[0]).unwrap();
            let b = Name::parse(pair[1]).unwrap();
            assert_eq!(a.canonical_cmp(&b), Ordering::Less, "{} < {}", a, b);
        }
    }

    #[test]
    fn canonical_wire_lowercases() {
        let name = Name::parse("WWW.Example.Com").unwrap();
        let wire = name.canonical_wire();
        assert_eq!(
            wire,
            [
                &[3u8][..],
                b"www",
                &[7],
                b"example",
                &[3],
                b"com",
                &[0]
            ]
            .concat()
        );
    }

    #[test]
    fn rejects_long_labels() {
        let long = "a".repeat(64);
        assert!(Name::parse(&long).is_err());
        assert!(Name::parse(&"a".repeat(63)).is_ok());
    }
}
