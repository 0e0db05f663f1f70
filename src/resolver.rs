use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ValidatorConfig;
use crate::dns::{EdnsOpt, Message, Rcode};
use crate::dnssec::{
    CancelToken, SMessage, SecurityStatus, TrustAnchorStore, Validator,
};
use crate::error::{ConfigError, TransportError};

/// The upstream that fetches raw DNS messages for the validator. The
/// production implementation forwards over UDP; tests replay canned
/// responses.
#[async_trait]
pub trait PrimingResolver: Send + Sync {
    async fn send(&self, query: &Message) -> Result<Message, TransportError>;
}

/// Forwards queries to one recursive resolver over UDP with per-attempt
/// timeouts and bounded retries.
pub struct UdpPrimingResolver {
    upstream: SocketAddr,
    attempt_timeout: Duration,
    max_retries: u8,
}

impl UdpPrimingResolver {
    pub fn new(upstream: SocketAddr) -> Self {
        UdpPrimingResolver {
            upstream,
            attempt_timeout: Duration::from_secs(2),
            max_retries: 2,
        }
    }

    pub fn with_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    async fn attempt(&self, wire: &[u8], id: u16) -> Result<Message, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.upstream).await?;
        socket.send(wire).await?;

        let mut buf = vec![0u8; 4096];
        loop {
            let len = socket.recv(&mut buf).await?;
            let message = Message::from_wire(&buf[..len])?;
            if message.header.id == id {
                return Ok(message);
            }
            debug!(
                got = message.header.id,
                want = id,
                "discarding mismatched response id"
            );
        }
    }
}

#[async_trait]
impl PrimingResolver for UdpPrimingResolver {
    async fn send(&self, query: &Message) -> Result<Message, TransportError> {
        let wire = query.to_wire()?;
        let id = query.header.id;

        let mut last_error = TransportError::Timeout;
        for attempt in 0..=self.max_retries {
            match timeout(self.attempt_timeout, self.attempt(&wire, id)).await {
                Ok(Ok(message)) => return Ok(message),
                Ok(Err(err)) => {
                    warn!(upstream = %self.upstream, attempt, %err, "upstream attempt failed");
                    last_error = err;
                }
                Err(_) => {
                    debug!(upstream = %self.upstream, attempt, "upstream attempt timed out");
                    last_error = TransportError::Timeout;
                }
            }
        }
        Err(last_error)
    }
}

/// A fully validated response: the wire message plus the out-of-wire
/// verdict and reason token
#[derive(Debug, Clone)]
pub struct ValidatedResponse {
    pub message: Message,
    pub security: SecurityStatus,
    pub reason: Option<String>,
}

/// The public entry point: forwards queries upstream with DO and CD set,
/// validates the response, and rewrites AD and RCODE according to the
/// verdict.
pub struct ValidatingResolver {
    resolver: Arc<dyn PrimingResolver>,
    validator: Validator,
    config: Arc<ValidatorConfig>,
}

impl ValidatingResolver {
    pub fn new(
        resolver: Arc<dyn PrimingResolver>,
        config: ValidatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let trust_anchors = match &config.trust_anchor_file {
            Some(path) => {
                let store = TrustAnchorStore::new();
                store.load_file(path)?;
                store
            }
            None if config.use_root_anchors => TrustAnchorStore::with_root_anchors(),
            None => TrustAnchorStore::new(),
        };
        if trust_anchors.is_empty() {
            return Err(ConfigError::NoTrustAnchors);
        }
        info!(anchors = trust_anchors.len(), "validator initialized");

        Ok(Self::with_trust_anchors(resolver, Arc::new(trust_anchors), config))
    }

    /// Assemble with explicitly injected collaborators; tests use this to
    /// hand in fresh stores
    pub fn with_trust_anchors(
        resolver: Arc<dyn PrimingResolver>,
        trust_anchors: Arc<TrustAnchorStore>,
        config: ValidatorConfig,
    ) -> Self {
        let config = Arc::new(config);
        let validator = Validator::new(resolver.clone(), trust_anchors, config.clone());
        ValidatingResolver {
            resolver,
            validator,
            config,
        }
    }

    /// Pin the validator clock for testing
    pub fn set_current_time(&mut self, time: u64) {
        self.validator.set_current_time(time);
    }

    /// Resolve and validate under the configured wall-clock budget
    pub async fn resolve(&self, query: &Message) -> Result<ValidatedResponse, TransportError> {
        let cancel = CancelToken::new();
        let guard = cancel.clone();
        match timeout(self.config.query_timeout, self.resolve_with_cancel(query, &cancel)).await {
            Ok(result) => result,
            Err(_) => {
                guard.cancel();
                Err(TransportError::Timeout)
            }
        }
    }

    /// Resolve and validate with caller-controlled cancellation
    pub async fn resolve_with_cancel(
        &self,
        query: &Message,
        cancel: &CancelToken,
    ) -> Result<ValidatedResponse, TransportError> {
        // A checking-disabled client asked us not to validate
        if query.header.cd {
            let mut response = self.forward(query).await?;
            response.header.ad = false;
            return Ok(ValidatedResponse {
                message: response,
                security: SecurityStatus::Indeterminate,
                reason: None,
            });
        }

        let upstream_response = self.forward(query).await?;
        let validated = self
            .validator
            .validate_message(query, &upstream_response, cancel)
            .await;
        Ok(self.finalize(query, validated))
    }

    /// Wire-level convenience: validated response only
    pub async fn send(&self, query: &Message) -> Result<Message, TransportError> {
        self.resolve(query).await.map(|validated| validated.message)
    }

    /// Send upstream with the DO and CD bits set so the upstream returns
    /// raw signed data and does not filter on its own validation
    async fn forward(&self, query: &Message) -> Result<Message, TransportError> {
        let mut upstream_query = query.clone();
        upstream_query.header.cd = true;
        let mut opt = upstream_query.edns().unwrap_or_default();
        opt.set_dnssec_ok(true);
        upstream_query.set_edns(opt);
        self.resolver.send(&upstream_query).await
    }

    /// Stamp AD and RCODE from the verdict. BOGUS maps to SERVFAIL with
    /// the original sections preserved for debugging; everything else
    /// passes the upstream response through with AD cleared unless SECURE.
    fn finalize(&self, query: &Message, validated: SMessage) -> ValidatedResponse {
        let security = validated.status();
        let reason = validated.reason().map(String::from);
        let mut message = validated.to_message();

        message.header.id = query.header.id;
        message.header.cd = query.header.cd;

        let wants_ad = query.header.ad || query.edns().is_some_and(|opt| opt.dnssec_ok());
        message.header.ad = security == SecurityStatus::Secure && wants_ad;

        if security == SecurityStatus::Bogus {
            message.header.rcode = u16::from(Rcode::ServFail) as u8;
            if let Some(opt) = message.edns() {
                let mut cleared = opt;
                cleared.extended_rcode = 0;
                message.set_edns(cleared);
            }
            debug!(
                reason = reason.as_deref().unwrap_or(""),
                "returning SERVFAIL for bogus response"
            );
        }

        ValidatedResponse {
            message,
            security,
            reason,
        }
    }
}

/// Build a minimal SERVFAIL for transport-level failures, in the shape the
/// daemon layer hands back to clients
pub fn servfail_for(query: &Message) -> Message {
    let mut response = Message {
        header: query.header.clone(),
        questions: query.questions.clone(),
        ..Message::default()
    };
    response.header.qr = true;
    response.header.ra = true;
    response.header.ad = false;
    response.header.rcode = u16::from(Rcode::ServFail) as u8;
    let mut opt = EdnsOpt::new();
    opt.set_dnssec_ok(false);
    response.set_edns(opt);
    response.update_counts();
    response
}
