mod edns;
mod enums;
mod header;
mod message;
mod name;
mod question;
mod rdata;
mod record;
mod wire;

pub use edns::EdnsOpt;
pub use enums::{Rcode, RecordClass, RecordType};
pub use header::Header;
pub use message::Message;
pub use name::Name;
pub use question::Question;
pub use rdata::{DnskeyRdata, DsRdata, Nsec3Rdata, NsecRdata, RrsigRdata, TypeBitmap};
pub use record::Record;
pub use wire::{parse_name_at, ParseError};
