mod builder;
mod error;
mod header;
mod headermap;
mod message;
mod nom_utils;
mod normalize;
mod rfc3464;
mod rfc5322_parser;
mod strings;
mod textwrap;

pub use error::MailModelError;
pub type Result<T> = std::result::Result<T, MailModelError>;

pub use builder::*;
pub use header::{Header, HeaderParseResult, MessageConformance};
pub use headermap::*;
pub use message::*;
pub use rfc3464::*;
pub use rfc5322_parser::*;
pub use strings::SharedString;
