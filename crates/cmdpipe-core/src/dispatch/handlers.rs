//! Handler table consumed by the dispatcher
//!
//! The host implements [`CommandHandlers`] with whatever actually performs
//! the operations. Handlers run on the execution thread only.

use thiserror::Error;

/// Failure reported by a command handler
///
/// The display text is the short reason placed in the error response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The host function needed for this operation is not available
    #[error("func null")]
    FunctionUnavailable,

    /// The host call faulted
    #[error("crash")]
    Crash,

    /// There is no player object to act on
    #[error("player null")]
    NoPlayer,

    /// There is no target to act on
    #[error("no target")]
    NoTarget,

    /// The host raised an exception with the given code
    ///
    /// The code is rendered in hex (`exception_0xC0000005`). Older hosts
    /// printed it in decimal after the `0x` prefix.
    #[error("exception_0x{0:X}")]
    Exception(u32),

    /// Any other failure, with a short reason
    #[error("{0}")]
    Failed(String),
}

/// Result type returned by handlers
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Cooldown state of a spell, in host seconds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpellCooldown {
    /// Time the cooldown started
    pub start: f64,
    /// Length of the cooldown
    pub duration: f64,
    /// Whether the cooldown is active
    pub enabled: bool,
}

/// Raw spell information fields as the host reports them
///
/// Every field is text because hosts commonly expose them through a
/// scripting API; the dispatcher converts and defaults them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSpellInfo {
    pub name: Option<String>,
    pub rank: Option<String>,
    pub icon: Option<String>,
    pub cost: Option<String>,
    pub power_type: Option<String>,
    pub cast_time: Option<String>,
    pub min_range: Option<String>,
    pub max_range: Option<String>,
}

/// Dispatch table: one handler per request kind
///
/// `ping` and unknown commands are answered by the dispatcher itself and
/// have no handler.
pub trait CommandHandlers {
    /// Run a script and return its stringified result
    ///
    /// A result already tagged `LUA_RESULT:ERROR:` is passed through as is.
    fn exec_lua(&mut self, code: &str) -> HandlerResult<String>;

    /// Current host time in milliseconds
    fn time_ms(&mut self) -> HandlerResult<i64>;

    /// Cooldown state of a spell
    fn spell_cooldown(&mut self, spell_id: i32) -> HandlerResult<SpellCooldown>;

    /// Whether `unit_id` is within range of the spell
    fn is_spell_in_range(&mut self, spell_id: i32, unit_id: &str) -> HandlerResult<bool>;

    /// Raw information about a spell
    fn spell_info(&mut self, spell_id: i32) -> HandlerResult<RawSpellInfo>;

    /// Cast a spell and return the host's result code
    fn cast_spell(&mut self, spell_id: i32, target_guid: u64) -> HandlerResult<i32>;

    /// Combo points on the current target
    fn combo_points(&mut self) -> HandlerResult<i32>;

    /// Identifier of the current target (0 when none)
    fn target_guid(&mut self) -> HandlerResult<u64>;

    /// Whether the player stands behind the given target
    fn is_behind_target(&mut self, target_guid: u64) -> HandlerResult<bool>;

    /// Start moving the player to a position
    fn move_to(&mut self, x: f32, y: f32, z: f32) -> HandlerResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_reasons() {
        assert_eq!(HandlerError::FunctionUnavailable.to_string(), "func null");
        assert_eq!(HandlerError::Crash.to_string(), "crash");
        assert_eq!(HandlerError::NoPlayer.to_string(), "player null");
        assert_eq!(
            HandlerError::Exception(0xC000_0005).to_string(),
            "exception_0xC0000005"
        );
        assert_eq!(
            HandlerError::Failed("not ready".to_string()).to_string(),
            "not ready"
        );
    }
}
