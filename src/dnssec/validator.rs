use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace, warn};

use crate::config::ValidatorConfig;
use crate::dns::{EdnsOpt, Message, Name, Nsec3Rdata, NsecRdata, RecordClass, RecordType};
use crate::error::TransportError;
use crate::resolver::PrimingResolver;

use super::classify::{classify, ResponseClassification};
use super::key_cache::KeyCache;
use super::keys::{self, KeyEntry};
use super::message::{SMessage, SRRset, Section, SecurityStatus};
use super::nsec::{self, NoDsProof};
use super::nsec3::{self, Nsec3Outcome, Nsec3Set};
use super::reason;
use super::trust_anchor::TrustAnchorStore;
use super::util::find_target_signer;
use super::verify::{RrsetVerifier, SigBudget};
use super::CancelToken;

/// CNAME chains longer than this are treated as loops
const MAX_CNAME_CHAIN: u8 = 11;

/// Cap on FINDKEY re-entries, bounding hostile signer ping-pong
const MAX_PRIME_ROUNDS: u8 = 16;

/// States of the per-request validation machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValEventState {
    Init,
    FindKey,
    Validate,
    Cname,
    Finished,
}

/// Everything one validation run owns: the response under test, the name
/// still to prove, the chain-of-trust cursor and the key under evaluation.
pub struct ValEvent {
    state: ValEventState,
    response: SMessage,
    qname: Name,
    qtype: RecordType,
    qclass: RecordClass,
    classification: ResponseClassification,
    /// Deepest zone whose keys are proven so far
    signer_name: Name,
    /// Zone whose keys must sign the response
    target_signer: Name,
    key_entry: Option<KeyEntry>,
    /// DS-form trust anchor awaiting its DNSKEY fetch
    anchor_ds: Option<SRRset>,
    /// Cursor into the answer section for CNAME chain progress
    answer_index: usize,
    cname_count: u8,
    prime_rounds: u8,
    pending_cname: Option<Name>,
    budget: SigBudget,
}

impl ValEvent {
    fn new(query: &Message, response: SMessage, budget: SigBudget) -> Self {
        let question = response
            .question()
            .cloned()
            .or_else(|| query.question().cloned());
        let (qname, qtype, qclass) = match question {
            Some(q) => (q.name, q.qtype, q.qclass),
            None => (Name::root(), RecordType::Unknown(0), RecordClass::IN),
        };
        ValEvent {
            state: ValEventState::Init,
            response,
            qname,
            qtype,
            qclass,
            classification: ResponseClassification::Unknown,
            signer_name: Name::root(),
            target_signer: Name::root(),
            key_entry: None,
            anchor_ds: None,
            answer_index: 0,
            cname_count: 0,
            prime_rounds: 0,
            pending_cname: None,
            budget,
        }
    }

    fn into_response(self) -> SMessage {
        self.response
    }
}

/// Verified NSEC/NSEC3 material extracted from an authority section
#[derive(Default)]
struct Proofs {
    nsec: Vec<(Name, NsecRdata)>,
    nsec3: Vec<(Name, Nsec3Rdata)>,
    min_ttl: u32,
}

enum DelegationOutcome {
    Key(KeyEntry),
    /// The name exists below the current zone without being a cut
    NotDelegation,
    /// A finish was already recorded on the event
    Abort,
}

enum ProofVerdict {
    Secure,
    Insecure,
    /// No denial records were present at all
    Missing,
    /// Denial records were present but do not prove the claim
    Failed,
}

/// The DNSSEC validation engine: primes authentication chains through the
/// priming resolver, dispatches per-classification proof checks and stamps
/// verdicts onto the response.
pub struct Validator {
    resolver: Arc<dyn PrimingResolver>,
    trust_anchors: Arc<TrustAnchorStore>,
    key_cache: KeyCache,
    verifier: RrsetVerifier,
    config: Arc<ValidatorConfig>,
    current_time: Option<u64>,
}

impl Validator {
    pub fn new(
        resolver: Arc<dyn PrimingResolver>,
        trust_anchors: Arc<TrustAnchorStore>,
        config: Arc<ValidatorConfig>,
    ) -> Self {
        Validator {
            resolver,
            trust_anchors,
            key_cache: KeyCache::new(config.key_cache_size, config.bad_key_ttl.as_secs()),
            verifier: RrsetVerifier::new(&config),
            config,
            current_time: None,
        }
    }

    /// Pin the clock for testing
    pub fn set_current_time(&mut self, time: u64) {
        self.current_time = Some(time);
        self.verifier.set_current_time(time as u32);
    }

    fn now(&self) -> u64 {
        self.current_time.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        })
    }

    /// Run the full state machine over one response
    pub async fn validate_message(
        &self,
        query: &Message,
        response: &Message,
        cancel: &CancelToken,
    ) -> SMessage {
        let smessage = SMessage::from_message(response);
        let budget = SigBudget::new(self.config.max_validate_rrsigs);
        let mut ev = ValEvent::new(query, smessage, budget);

        while ev.state != ValEventState::Finished {
            if cancel.is_cancelled() {
                self.finish(
                    &mut ev,
                    SecurityStatus::Indeterminate,
                    Some(reason::CANCELLED.to_string()),
                );
                break;
            }
            match ev.state {
                ValEventState::Init => self.process_init(&mut ev),
                ValEventState::FindKey => self.process_findkey(&mut ev, cancel).await,
                ValEventState::Validate => self.process_validate(&mut ev, cancel),
                ValEventState::Cname => self.process_cname(&mut ev),
                ValEventState::Finished => {}
            }
        }
        ev.into_response()
    }

    fn process_init(&self, ev: &mut ValEvent) {
        ev.classification = classify(&ev.response);
        debug!(
            qname = %ev.qname,
            qtype = %ev.qtype,
            classification = %ev.classification,
            "validation started"
        );

        if ev.classification == ResponseClassification::Unknown {
            self.finish_bogus(ev, reason::FAILED_CLASSIFICATION);
            return;
        }

        let Some(anchor) = self.trust_anchors.find(&ev.qname, ev.qclass) else {
            debug!(qname = %ev.qname, "no trust anchor covers the name");
            self.finish(ev, SecurityStatus::Indeterminate, None);
            return;
        };

        ev.target_signer = find_target_signer(&ev.response, &ev.qname);
        ev.signer_name = anchor.name().clone();
        if anchor.rtype() == RecordType::DNSKEY {
            ev.key_entry = Some(KeyEntry::good(anchor));
        } else {
            ev.anchor_ds = Some(anchor);
        }
        ev.state = ValEventState::FindKey;
    }

    /// Walk zone delegations from the proven cursor down to the target
    /// signer, establishing one KeyEntry per zone cut.
    async fn process_findkey(&self, ev: &mut ValEvent, cancel: &CancelToken) {
        ev.prime_rounds += 1;
        if ev.prime_rounds > MAX_PRIME_ROUNDS {
            self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
            return;
        }

        // A CNAME hop can point outside the proven chain; re-anchor then
        if !ev.target_signer.is_subdomain_of(&ev.signer_name) {
            let Some(anchor) = self.trust_anchors.find(&ev.target_signer, ev.qclass) else {
                debug!(target = %ev.target_signer, "no trust anchor covers the new signer");
                self.finish(ev, SecurityStatus::Indeterminate, None);
                return;
            };
            ev.signer_name = anchor.name().clone();
            ev.key_entry = None;
            ev.anchor_ds = None;
            if anchor.rtype() == RecordType::DNSKEY {
                ev.key_entry = Some(KeyEntry::good(anchor));
            } else {
                ev.anchor_ds = Some(anchor);
            }
        }

        // A DS-form anchor needs its zone's DNSKEY fetched first
        if ev.key_entry.is_none() {
            let Some(ds_anchor) = ev.anchor_ds.take() else {
                self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
                return;
            };
            let zone = ev.signer_name.clone();
            let entry = self.establish_keys(&zone, &ds_anchor, ev, cancel).await;
            self.key_cache.put(entry.clone(), self.now());
            match entry {
                KeyEntry::Good { .. } => ev.key_entry = Some(entry),
                KeyEntry::Null { .. } => {
                    self.finish(ev, SecurityStatus::Insecure, None);
                    return;
                }
                KeyEntry::Bad { .. } => {
                    self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
                    return;
                }
            }
        }

        while ev.signer_name != ev.target_signer {
            if cancel.is_cancelled() {
                self.finish(
                    ev,
                    SecurityStatus::Indeterminate,
                    Some(reason::CANCELLED.to_string()),
                );
                return;
            }
            let next_zone = ev
                .target_signer
                .suffix(ev.signer_name.label_count() + 1);
            trace!(cursor = %ev.signer_name, %next_zone, "stepping down the chain");

            if let Some(entry) = self.key_cache.get(&next_zone, ev.qclass, self.now()) {
                match entry {
                    KeyEntry::Good { .. } => {
                        ev.signer_name = next_zone;
                        ev.key_entry = Some(entry);
                        continue;
                    }
                    KeyEntry::Null { .. } => {
                        self.finish(ev, SecurityStatus::Insecure, None);
                        return;
                    }
                    KeyEntry::Bad { .. } => {
                        self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
                        return;
                    }
                }
            }

            match self.establish_delegation(ev, &next_zone, cancel).await {
                DelegationOutcome::Key(entry) => {
                    self.key_cache.put(entry.clone(), self.now());
                    match entry {
                        KeyEntry::Good { .. } => {
                            ev.signer_name = next_zone;
                            ev.key_entry = Some(entry);
                        }
                        KeyEntry::Null { .. } => {
                            debug!(zone = %next_zone, "chain ends at insecure delegation");
                            self.finish(ev, SecurityStatus::Insecure, None);
                            return;
                        }
                        KeyEntry::Bad { .. } => {
                            self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
                            return;
                        }
                    }
                }
                DelegationOutcome::NotDelegation => {
                    if next_zone == ev.target_signer {
                        // The response claims this name signs it, yet it is
                        // provably not a zone
                        self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                        return;
                    }
                    ev.signer_name = next_zone;
                }
                DelegationOutcome::Abort => return,
            }
        }

        ev.state = ValEventState::Validate;
    }

    /// One step of the chain walk: DS lookup for `zone`, then either DNSKEY
    /// validation, a proof of insecurity, or a pass-through for non-cuts.
    async fn establish_delegation(
        &self,
        ev: &mut ValEvent,
        zone: &Name,
        cancel: &CancelToken,
    ) -> DelegationOutcome {
        let ds_message = match self.prime(zone, RecordType::DS, ev.qclass, cancel).await {
            Ok(message) => message,
            Err(err) => {
                warn!(%zone, %err, "DS query failed");
                self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                return DelegationOutcome::Abort;
            }
        };
        let mut ds_response = SMessage::from_message(&ds_message);

        match classify(&ds_response) {
            ResponseClassification::Positive => {
                let Some(idx) = ds_response
                    .section(Section::Answer)
                    .iter()
                    .position(|s| s.name() == zone && s.rtype() == RecordType::DS)
                else {
                    self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                    return DelegationOutcome::Abort;
                };
                let Some(keys) = ev.key_entry.as_ref().and_then(KeyEntry::good_keys).cloned()
                else {
                    self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
                    return DelegationOutcome::Abort;
                };
                let status = self.verifier.verify_rrset(
                    &mut ds_response.section_mut(Section::Answer)[idx],
                    &keys,
                    &mut ev.budget,
                    cancel,
                );
                if status != SecurityStatus::Secure {
                    self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                    return DelegationOutcome::Abort;
                }
                let ds_set = ds_response.section(Section::Answer)[idx].clone();
                let entry = self.establish_keys(zone, &ds_set, ev, cancel).await;
                DelegationOutcome::Key(entry)
            }

            ResponseClassification::Nodata => {
                let Some(keys) = ev.key_entry.as_ref().and_then(KeyEntry::good_keys).cloned()
                else {
                    self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
                    return DelegationOutcome::Abort;
                };
                let proofs =
                    match self.verify_proofs_in(&mut ds_response, &keys, &mut ev.budget, cancel) {
                        Ok(proofs) => proofs,
                        Err(()) => {
                            self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                            return DelegationOutcome::Abort;
                        }
                    };

                if !proofs.nsec.is_empty() {
                    match nsec::prove_no_ds(&proofs.nsec, zone) {
                        NoDsProof::InsecureDelegation => {
                            return DelegationOutcome::Key(KeyEntry::null(
                                zone.clone(),
                                ev.qclass,
                                proofs.min_ttl,
                            ));
                        }
                        NoDsProof::NotDelegation => return DelegationOutcome::NotDelegation,
                        NoDsProof::Bogus => {
                            self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                            return DelegationOutcome::Abort;
                        }
                        NoDsProof::None => {}
                    }
                }
                if !proofs.nsec3.is_empty() {
                    let key_bits = max_key_bits(&keys);
                    match nsec3::gather(&proofs.nsec3) {
                        Ok(set) => {
                            if !nsec3::iterations_acceptable(&self.config, &set.params, key_bits) {
                                // Over-iterated chains are opaque to us, not hostile
                                return DelegationOutcome::Key(KeyEntry::null(
                                    zone.clone(),
                                    ev.qclass,
                                    proofs.min_ttl,
                                ));
                            }
                            match nsec3::prove_no_ds(&set, zone) {
                                NoDsProof::InsecureDelegation => {
                                    return DelegationOutcome::Key(KeyEntry::null(
                                        zone.clone(),
                                        ev.qclass,
                                        proofs.min_ttl,
                                    ));
                                }
                                NoDsProof::NotDelegation => {
                                    return DelegationOutcome::NotDelegation;
                                }
                                NoDsProof::Bogus | NoDsProof::None => {
                                    self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                                    return DelegationOutcome::Abort;
                                }
                            }
                        }
                        Err(err) => {
                            debug!(%zone, %err, "NSEC3 gathering failed during DS check");
                            self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                            return DelegationOutcome::Abort;
                        }
                    }
                }
                self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                DelegationOutcome::Abort
            }

            other => {
                debug!(%zone, classification = %other, "unusable DS response");
                self.finish_bogus(ev, reason::FAILED_FINDKEY_DS);
                DelegationOutcome::Abort
            }
        }
    }

    /// Fetch the DNSKEY RRset of `zone` and validate it against `ds_set`
    async fn establish_keys(
        &self,
        zone: &Name,
        ds_set: &SRRset,
        ev: &mut ValEvent,
        cancel: &CancelToken,
    ) -> KeyEntry {
        let bad_ttl = self.config.bad_key_ttl.as_secs() as u32;
        let key_message = match self.prime(zone, RecordType::DNSKEY, ev.qclass, cancel).await {
            Ok(message) => message,
            Err(err) => {
                warn!(%zone, %err, "DNSKEY query failed");
                return KeyEntry::bad(zone.clone(), ev.qclass, "DNSKEY query failed", bad_ttl);
            }
        };
        let key_response = SMessage::from_message(&key_message);
        let Some(rrset) = key_response
            .section(Section::Answer)
            .iter()
            .find(|s| s.name() == zone && s.rtype() == RecordType::DNSKEY)
        else {
            return KeyEntry::bad(zone.clone(), ev.qclass, "no DNSKEY RRset in response", bad_ttl);
        };
        let mut dnskey_rrset = rrset.clone();
        keys::verify_dnskey_with_ds(
            &mut dnskey_rrset,
            ds_set,
            &self.config,
            &self.verifier,
            &mut ev.budget,
            cancel,
        )
    }

    /// Ask the priming resolver with DO and CD set, so the upstream hands
    /// back raw signed data without filtering
    async fn prime(
        &self,
        name: &Name,
        rtype: RecordType,
        class: RecordClass,
        cancel: &CancelToken,
    ) -> Result<Message, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Upstream("request cancelled".to_string()));
        }
        let mut query = Message::query(name.clone(), rtype);
        query.questions[0].qclass = class;
        query.header.cd = true;
        let mut opt = EdnsOpt::new();
        opt.set_dnssec_ok(true);
        query.set_edns(opt);
        trace!(%name, %rtype, "priming query");
        self.resolver.send(&query).await
    }

    fn process_validate(&self, ev: &mut ValEvent, cancel: &CancelToken) {
        match ev.classification {
            ResponseClassification::Positive
            | ResponseClassification::Any
            | ResponseClassification::Cname
            | ResponseClassification::CnameNodata
            | ResponseClassification::CnameNameError => self.validate_chain(ev, cancel),
            ResponseClassification::Nodata => self.finish_nodata_proofs(ev, cancel),
            ResponseClassification::NameError => self.finish_nameerror_proofs(ev, cancel),
            ResponseClassification::Referral => self.validate_referral(ev, cancel),
            ResponseClassification::Unknown => {
                self.finish_bogus(ev, reason::FAILED_CLASSIFICATION)
            }
        }
    }

    /// Verify answer RRsets in chain order, re-priming keys at signer
    /// switches and enforcing wildcard proof obligations.
    fn validate_chain(&self, ev: &mut ValEvent, cancel: &CancelToken) {
        let Some(keys) = ev.key_entry.as_ref().and_then(KeyEntry::good_keys).cloned() else {
            self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
            return;
        };

        while ev.answer_index < ev.response.section(Section::Answer).len() {
            let idx = ev.answer_index;
            let (owner, rtype, signer, cname_target) = {
                let rrset = &ev.response.section(Section::Answer)[idx];
                (
                    rrset.name().clone(),
                    rrset.rtype(),
                    rrset.signer(),
                    cname_target_of(rrset),
                )
            };

            let bogus_token = if rtype == RecordType::CNAME {
                reason::FAILED_CNAME
            } else {
                reason::FAILED_POSITIVE
            };

            match signer {
                Some(signer) if signer != ev.signer_name => {
                    ev.target_signer = signer;
                    ev.state = ValEventState::FindKey;
                    return;
                }
                Some(_) => {}
                None => {
                    debug!(%owner, %rtype, "unsigned RRset in answer");
                    self.finish_bogus(ev, bogus_token);
                    return;
                }
            }

            let status = self.verifier.verify_rrset(
                &mut ev.response.section_mut(Section::Answer)[idx],
                &keys,
                &mut ev.budget,
                cancel,
            );
            if status != SecurityStatus::Secure {
                self.finish_bogus(ev, bogus_token);
                return;
            }

            let wildcard = ev.response.section(Section::Answer)[idx]
                .wildcard_source()
                .cloned();
            if let Some(wildcard) = wildcard {
                match self.check_wildcard_proof(ev, &owner, &wildcard, &keys, cancel) {
                    ProofVerdict::Secure => {}
                    ProofVerdict::Insecure => {
                        self.finish(
                            ev,
                            SecurityStatus::Insecure,
                            Some(reason::FAILED_ANSWER_NSEC3_INSECURE.to_string()),
                        );
                        return;
                    }
                    ProofVerdict::Missing => {
                        self.finish_bogus(ev, reason::FAILED_POSITIVE_WILDCARD);
                        return;
                    }
                    ProofVerdict::Failed => {
                        self.finish_bogus(ev, reason::FAILED_POSITIVE_NODATA);
                        return;
                    }
                }
            }

            if rtype == RecordType::CNAME
                && ev.qtype != RecordType::CNAME
                && ev.qtype != RecordType::ANY
                && owner == ev.qname
            {
                ev.pending_cname = cname_target;
                ev.answer_index = idx + 1;
                ev.state = ValEventState::Cname;
                return;
            }
            ev.answer_index = idx + 1;
        }

        match ev.classification {
            ResponseClassification::Positive
            | ResponseClassification::Any
            | ResponseClassification::Cname => {
                let aggregate = self.aggregate(ev);
                self.finish(ev, aggregate, None);
            }
            ResponseClassification::CnameNodata => self.finish_nodata_proofs(ev, cancel),
            ResponseClassification::CnameNameError => self.finish_nameerror_proofs(ev, cancel),
            _ => self.finish_bogus(ev, reason::FAILED_CLASSIFICATION),
        }
    }

    fn process_cname(&self, ev: &mut ValEvent) {
        ev.cname_count += 1;
        if ev.cname_count > MAX_CNAME_CHAIN {
            warn!(qname = %ev.qname, "CNAME chain exceeds the loop bound");
            self.finish_bogus(ev, reason::FAILED_CNAME_CHAIN);
            return;
        }
        let Some(target) = ev.pending_cname.take() else {
            self.finish_bogus(ev, reason::FAILED_CNAME);
            return;
        };
        trace!(from = %ev.qname, to = %target, "following CNAME");
        ev.qname = target;
        ev.state = ValEventState::Validate;
    }

    /// The signer the authority proofs claim, for re-priming before
    /// terminal negative validation
    fn authority_proof_signer(&self, ev: &ValEvent) -> Option<Name> {
        ev.response
            .section(Section::Authority)
            .iter()
            .filter(|s| {
                matches!(
                    s.rtype(),
                    RecordType::SOA | RecordType::NSEC | RecordType::NSEC3
                )
            })
            .find_map(|s| s.signer())
    }

    fn reprime_for_authority(&self, ev: &mut ValEvent) -> bool {
        if let Some(signer) = self.authority_proof_signer(ev) {
            if signer != ev.signer_name {
                ev.target_signer = signer;
                ev.state = ValEventState::FindKey;
                return true;
            }
        }
        false
    }

    fn finish_nodata_proofs(&self, ev: &mut ValEvent, cancel: &CancelToken) {
        if self.reprime_for_authority(ev) {
            return;
        }
        let Some(keys) = ev.key_entry.as_ref().and_then(KeyEntry::good_keys).cloned() else {
            self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
            return;
        };

        let has_nsec3 = section_has_type(&ev.response, RecordType::NSEC3);
        let failed_token = if has_nsec3 {
            reason::FAILED_NODATA_NSEC3
        } else if section_has_type(&ev.response, RecordType::NSEC) {
            reason::FAILED_NODATA_NSEC
        } else {
            reason::FAILED_NODATA
        };

        let proofs = match self.verify_authority_proofs(ev, &keys, cancel) {
            Ok(proofs) => proofs,
            Err(()) => {
                self.finish_bogus(ev, failed_token);
                return;
            }
        };

        if !proofs.nsec.is_empty() {
            if nsec::prove_nodata(&proofs.nsec, &ev.qname, ev.qtype) {
                let aggregate = self.aggregate(ev);
                self.finish(ev, aggregate, None);
            } else {
                self.finish_bogus(ev, reason::FAILED_NODATA_NSEC);
            }
            return;
        }
        if !proofs.nsec3.is_empty() {
            match self.nsec3_check(&proofs.nsec3, &keys, |set| {
                nsec3::prove_nodata(set, &ev.qname, ev.qtype)
            }) {
                Nsec3Outcome::Secure => {
                    let aggregate = self.aggregate(ev);
                    self.finish(ev, aggregate, None);
                }
                Nsec3Outcome::Insecure => self.finish(
                    ev,
                    SecurityStatus::Insecure,
                    Some(reason::FAILED_NODATA_NSEC3_INSECURE.to_string()),
                ),
                Nsec3Outcome::Bogus => self.finish_bogus(ev, reason::FAILED_NODATA_NSEC3),
            }
            return;
        }
        self.finish_bogus(ev, reason::FAILED_NODATA);
    }

    fn finish_nameerror_proofs(&self, ev: &mut ValEvent, cancel: &CancelToken) {
        if self.reprime_for_authority(ev) {
            return;
        }
        let Some(keys) = ev.key_entry.as_ref().and_then(KeyEntry::good_keys).cloned() else {
            self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
            return;
        };

        let has_nsec3 = section_has_type(&ev.response, RecordType::NSEC3);
        let failed_token = if has_nsec3 {
            reason::FAILED_NXDOMAIN_NSEC3
        } else if section_has_type(&ev.response, RecordType::NSEC) {
            reason::FAILED_NXDOMAIN_NSEC
        } else {
            reason::FAILED_NXDOMAIN
        };

        let proofs = match self.verify_authority_proofs(ev, &keys, cancel) {
            Ok(proofs) => proofs,
            Err(()) => {
                self.finish_bogus(ev, failed_token);
                return;
            }
        };

        if !proofs.nsec.is_empty() {
            if nsec::prove_name_error(&proofs.nsec, &ev.qname) {
                let aggregate = self.aggregate(ev);
                self.finish(ev, aggregate, None);
            } else {
                // Includes the NODATA-relabeled-as-NXDOMAIN downgrade
                self.finish_bogus(ev, reason::FAILED_NXDOMAIN_NSEC);
            }
            return;
        }
        if !proofs.nsec3.is_empty() {
            match self.nsec3_check(&proofs.nsec3, &keys, |set| {
                nsec3::prove_name_error(set, &ev.qname)
            }) {
                Nsec3Outcome::Secure => {
                    let aggregate = self.aggregate(ev);
                    self.finish(ev, aggregate, None);
                }
                Nsec3Outcome::Insecure => self.finish(
                    ev,
                    SecurityStatus::Insecure,
                    Some(reason::FAILED_NXDOMAIN_NSEC3_INSECURE.to_string()),
                ),
                Nsec3Outcome::Bogus => self.finish_bogus(ev, reason::FAILED_NXDOMAIN_NSEC3),
            }
            return;
        }
        self.finish_bogus(ev, reason::FAILED_NXDOMAIN);
    }

    /// Referral: decide SECURE referral vs INSECURE delegation from the DS
    /// RRset or its proven absence
    fn validate_referral(&self, ev: &mut ValEvent, cancel: &CancelToken) {
        let Some(delegation) = ev
            .response
            .section(Section::Authority)
            .iter()
            .find(|s| s.rtype() == RecordType::NS)
            .map(|s| s.name().clone())
        else {
            self.finish_bogus(ev, reason::FAILED_REFERRAL);
            return;
        };
        let Some(keys) = ev.key_entry.as_ref().and_then(KeyEntry::good_keys).cloned() else {
            self.finish_bogus(ev, reason::FAILED_FINDKEY_DNSKEY);
            return;
        };

        let ds_idx = ev
            .response
            .section(Section::Authority)
            .iter()
            .position(|s| s.name() == &delegation && s.rtype() == RecordType::DS);
        if let Some(idx) = ds_idx {
            let status = self.verifier.verify_rrset(
                &mut ev.response.section_mut(Section::Authority)[idx],
                &keys,
                &mut ev.budget,
                cancel,
            );
            if status == SecurityStatus::Secure {
                self.finish(ev, SecurityStatus::Secure, None);
            } else {
                self.finish_bogus(ev, reason::FAILED_REFERRAL_DS);
            }
            return;
        }

        let proofs = match self.verify_authority_proofs(ev, &keys, cancel) {
            Ok(proofs) => proofs,
            Err(()) => {
                self.finish_bogus(ev, reason::FAILED_REFERRAL_DS);
                return;
            }
        };
        if !proofs.nsec.is_empty() {
            match nsec::prove_no_ds(&proofs.nsec, &delegation) {
                NoDsProof::InsecureDelegation => {
                    self.finish(ev, SecurityStatus::Insecure, None)
                }
                _ => self.finish_bogus(ev, reason::FAILED_REFERRAL_DS),
            }
            return;
        }
        if !proofs.nsec3.is_empty() {
            let outcome = self.nsec3_check(&proofs.nsec3, &keys, |set| {
                match nsec3::prove_no_ds(set, &delegation) {
                    NoDsProof::InsecureDelegation => Nsec3Outcome::Insecure,
                    _ => Nsec3Outcome::Bogus,
                }
            });
            match outcome {
                // Both opt-out and over-iterated chains land here
                Nsec3Outcome::Insecure => self.finish(ev, SecurityStatus::Insecure, None),
                _ => self.finish_bogus(ev, reason::FAILED_REFERRAL_DS),
            }
            return;
        }
        self.finish_bogus(ev, reason::FAILED_REFERRAL);
    }

    /// The wildcard obligation of a synthesized positive answer: the exact
    /// name must be proven absent by the authority section.
    fn check_wildcard_proof(
        &self,
        ev: &mut ValEvent,
        expanded_name: &Name,
        wildcard: &Name,
        keys: &SRRset,
        cancel: &CancelToken,
    ) -> ProofVerdict {
        debug!(%expanded_name, %wildcard, "checking wildcard denial");
        let proofs = match self.verify_authority_proofs(ev, keys, cancel) {
            Ok(proofs) => proofs,
            Err(()) => return ProofVerdict::Failed,
        };

        if !proofs.nsec.is_empty() {
            return if nsec::prove_wildcard(&proofs.nsec, expanded_name, wildcard) {
                ProofVerdict::Secure
            } else {
                ProofVerdict::Failed
            };
        }
        if !proofs.nsec3.is_empty() {
            return match self.nsec3_check(&proofs.nsec3, keys, |set| {
                if nsec3::prove_wildcard(set, expanded_name, wildcard) {
                    Nsec3Outcome::Secure
                } else {
                    Nsec3Outcome::Bogus
                }
            }) {
                Nsec3Outcome::Secure => ProofVerdict::Secure,
                Nsec3Outcome::Insecure => ProofVerdict::Insecure,
                Nsec3Outcome::Bogus => ProofVerdict::Failed,
            };
        }
        ProofVerdict::Missing
    }

    /// Verify the proofs of the response under validation
    fn verify_authority_proofs(
        &self,
        ev: &mut ValEvent,
        keys: &SRRset,
        cancel: &CancelToken,
    ) -> Result<Proofs, ()> {
        self.verify_proofs_in(&mut ev.response, keys, &mut ev.budget, cancel)
    }

    /// Verify every SOA/NSEC/NSEC3 RRset in a message's authority section
    /// under `keys` and extract the denial material. Any verification
    /// failure poisons the proofs entirely.
    fn verify_proofs_in(
        &self,
        response: &mut SMessage,
        keys: &SRRset,
        budget: &mut SigBudget,
        cancel: &CancelToken,
    ) -> Result<Proofs, ()> {
        let mut proofs = Proofs {
            min_ttl: u32::MAX,
            ..Proofs::default()
        };
        for idx in 0..response.section(Section::Authority).len() {
            let rtype = response.section(Section::Authority)[idx].rtype();
            if !matches!(
                rtype,
                RecordType::SOA | RecordType::NSEC | RecordType::NSEC3
            ) {
                continue;
            }
            let status = response.section(Section::Authority)[idx].status();
            if status == SecurityStatus::Unchecked {
                let verified = self.verifier.verify_rrset(
                    &mut response.section_mut(Section::Authority)[idx],
                    keys,
                    budget,
                    cancel,
                );
                if verified != SecurityStatus::Secure {
                    debug!(rtype = %rtype, "authority proof RRset failed verification");
                    return Err(());
                }
            } else if status != SecurityStatus::Secure {
                return Err(());
            }

            let rrset = &response.section(Section::Authority)[idx];
            proofs.min_ttl = proofs.min_ttl.min(rrset.ttl());
            match rtype {
                RecordType::NSEC => {
                    for record in rrset.records() {
                        if let Ok(rdata) = record.nsec() {
                            proofs.nsec.push((record.name.clone(), rdata));
                        }
                    }
                }
                RecordType::NSEC3 => {
                    for record in rrset.records() {
                        if let Ok(rdata) = record.nsec3() {
                            proofs.nsec3.push((record.name.clone(), rdata));
                        }
                    }
                }
                _ => {}
            }
        }
        if proofs.min_ttl == u32::MAX {
            proofs.min_ttl = 60;
        }
        Ok(proofs)
    }

    /// NSEC3 gathering plus the iteration ceiling, shared by every NSEC3
    /// proof site
    fn nsec3_check<F>(&self, entries: &[(Name, Nsec3Rdata)], keys: &SRRset, prove: F) -> Nsec3Outcome
    where
        F: Fn(&Nsec3Set) -> Nsec3Outcome,
    {
        let set = match nsec3::gather(entries) {
            Ok(set) => set,
            Err(err) => {
                debug!(%err, "NSEC3 set rejected");
                return Nsec3Outcome::Bogus;
            }
        };
        if !nsec3::iterations_acceptable(&self.config, &set.params, max_key_bits(keys)) {
            debug!(
                iterations = set.params.iterations,
                "NSEC3 iteration count above the configured ceiling"
            );
            return Nsec3Outcome::Insecure;
        }
        prove(&set)
    }

    /// Response verdict over the answer section: BOGUS dominates, then
    /// INSECURE, then SECURE iff everything is secure
    fn aggregate(&self, ev: &ValEvent) -> SecurityStatus {
        let mut any_insecure = false;
        let mut all_secure = true;
        for rrset in ev.response.section(Section::Answer) {
            match rrset.status() {
                SecurityStatus::Bogus => return SecurityStatus::Bogus,
                SecurityStatus::Insecure => {
                    any_insecure = true;
                    all_secure = false;
                }
                SecurityStatus::Secure => {}
                SecurityStatus::Unchecked | SecurityStatus::Indeterminate => all_secure = false,
            }
        }
        if any_insecure {
            SecurityStatus::Insecure
        } else if all_secure {
            SecurityStatus::Secure
        } else {
            SecurityStatus::Indeterminate
        }
    }

    fn finish_bogus(&self, ev: &mut ValEvent, token: &str) {
        self.finish(ev, SecurityStatus::Bogus, Some(token.to_string()));
    }

    fn finish(&self, ev: &mut ValEvent, status: SecurityStatus, reason: Option<String>) {
        match status {
            SecurityStatus::Bogus => {
                warn!(qname = %ev.qname, reason = reason.as_deref().unwrap_or(""), "validation failed")
            }
            _ => debug!(qname = %ev.qname, ?status, "validation finished"),
        }

        // Remaining unchecked sets inherit the verdict, except that a
        // SECURE outcome never rubs off on sets no proof touched; those and
        // the additional section stay unauthenticated
        let unchecked_status = if status == SecurityStatus::Secure {
            SecurityStatus::Insecure
        } else {
            status
        };
        for section in [Section::Answer, Section::Authority] {
            for rrset in ev.response.section_mut(section) {
                if rrset.status() == SecurityStatus::Unchecked {
                    rrset.set_security(unchecked_status);
                }
            }
        }
        for rrset in ev.response.section_mut(Section::Additional) {
            if rrset.status() == SecurityStatus::Unchecked {
                rrset.set_security(SecurityStatus::Insecure);
            }
        }
        ev.response.set_status(status, reason);
        ev.state = ValEventState::Finished;
    }
}

fn cname_target_of(rrset: &SRRset) -> Option<Name> {
    if rrset.rtype() != RecordType::CNAME {
        return None;
    }
    let record = rrset.records().first()?;
    let (labels, _) = crate::dns::parse_name_at(&record.rdata, 0).ok()?;
    Name::from_labels(labels).ok()
}

fn section_has_type(response: &SMessage, rtype: RecordType) -> bool {
    response
        .section(Section::Authority)
        .iter()
        .any(|s| s.rtype() == rtype)
}

/// The strongest key in the set, for the NSEC3 iteration buckets
fn max_key_bits(keys: &SRRset) -> usize {
    keys.records()
        .iter()
        .filter_map(|r| r.dnskey().ok())
        .map(|k| k.key_size_bits())
        .max()
        .unwrap_or(0)
}
