pub mod algorithm;
pub mod canonical;
pub mod classify;
pub mod key_cache;
pub mod keys;
pub mod message;
pub mod nsec;
pub mod nsec3;
pub mod trust_anchor;
pub mod util;
pub mod validator;
pub mod verify;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use algorithm::{Algorithm, DigestType};
pub use classify::ResponseClassification;
pub use key_cache::KeyCache;
pub use keys::KeyEntry;
pub use message::{SMessage, SRRset, Section, SecurityStatus};
pub use trust_anchor::TrustAnchorStore;
pub use validator::Validator;
pub use verify::RrsetVerifier;

/// Stable reason tokens for validation outcomes, forming a dotted
/// `failed.<phase>.<specifics>` hierarchy that tests and operators can
/// match exactly.
pub mod reason {
    pub const FAILED_CLASSIFICATION: &str = "failed.classification";
    pub const FAILED_POSITIVE: &str = "failed.answer.positive";
    pub const FAILED_POSITIVE_NODATA: &str = "failed.answer.positive_nodata";
    pub const FAILED_POSITIVE_WILDCARD: &str = "failed.answer.positive_wildcard";
    pub const FAILED_ANSWER_NSEC3_INSECURE: &str = "failed.answer.nsec3_insecure";
    pub const FAILED_CNAME: &str = "failed.answer.cname";
    pub const FAILED_CNAME_CHAIN: &str = "failed.answer.cname_chain";
    pub const FAILED_NODATA: &str = "failed.nodata";
    pub const FAILED_NODATA_NSEC: &str = "failed.nodata.nsec_bogus";
    pub const FAILED_NODATA_NSEC3: &str = "failed.nodata.nsec3_bogus";
    pub const FAILED_NODATA_NSEC3_INSECURE: &str = "failed.nodata.nsec3_insecure";
    pub const FAILED_NXDOMAIN: &str = "failed.nxdomain";
    pub const FAILED_NXDOMAIN_NSEC: &str = "failed.nxdomain.nsec_bogus";
    pub const FAILED_NXDOMAIN_NSEC3: &str = "failed.nxdomain.nsec3_bogus";
    pub const FAILED_NXDOMAIN_NSEC3_INSECURE: &str = "failed.nxdomain.nsec3_insecure";
    pub const FAILED_FINDKEY_DS: &str = "failed.findkey.ds";
    pub const FAILED_FINDKEY_DNSKEY: &str = "failed.findkey.dnskey";
    pub const FAILED_REFERRAL: &str = "failed.referral";
    pub const FAILED_REFERRAL_DS: &str = "failed.referral.ds";
    pub const CANCELLED: &str = "cancelled";
}

/// Cooperative per-request cancellation, checked before upstream sends and
/// before each signature verification to bound CPU on hostile chains.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
    }
}
