//! Execution-side dispatch of parsed requests

mod dispatcher;
mod handlers;

pub use dispatcher::Dispatcher;
pub use handlers::{CommandHandlers, HandlerError, HandlerResult, RawSpellInfo, SpellCooldown};
