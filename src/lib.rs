pub mod config;
pub mod dns;
pub mod dnssec;
pub mod error;
pub mod resolver;

pub use config::ValidatorConfig;
pub use dns::Message;
pub use dnssec::SecurityStatus;
pub use resolver::{PrimingResolver, UdpPrimingResolver, ValidatedResponse, ValidatingResolver};
