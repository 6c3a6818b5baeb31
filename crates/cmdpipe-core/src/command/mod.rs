//! Command text, typed requests and tagged responses

mod parser;
mod request;
pub mod response;

pub use parser::{parse_command, MAX_UNIT_ID_LEN};
pub use request::{Request, RequestKind};
