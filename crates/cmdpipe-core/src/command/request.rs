//! Typed requests produced by the command parser

use std::fmt;

/// Kind of operation a parsed command represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Liveness probe
    Ping,
    /// Current host time in milliseconds
    GetTimeMs,
    /// Combo points on the current target
    GetComboPoints,
    /// Identifier of the current target
    GetTargetGuid,
    /// Run a script in the host
    ExecLua,
    /// Cooldown state of a spell
    GetCooldown,
    /// Static information about a spell
    GetSpellInfo,
    /// Cast a spell on a target
    CastSpell,
    /// Whether the player stands behind a target
    IsBehindTarget,
    /// Move the player to a position
    MoveTo,
    /// Whether a unit is within a spell's range
    IsInRange,
    /// Text that matched no grammar
    Unknown,
}

/// A parsed command, carrying only the fields its kind needs
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    GetTimeMs,
    GetComboPoints,
    GetTargetGuid,
    ExecLua { code: String },
    GetCooldown { spell_id: i32 },
    GetSpellInfo { spell_id: i32 },
    CastSpell { spell_id: i32, target_guid: u64 },
    IsBehindTarget { target_guid: u64 },
    MoveTo { x: f32, y: f32, z: f32 },
    IsInRange { spell_id: i32, unit_id: String },
    /// Original text, kept for diagnostics and never executed
    Unknown { raw: String },
}

impl Request {
    /// Get the kind of this request
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Ping => RequestKind::Ping,
            Request::GetTimeMs => RequestKind::GetTimeMs,
            Request::GetComboPoints => RequestKind::GetComboPoints,
            Request::GetTargetGuid => RequestKind::GetTargetGuid,
            Request::ExecLua { .. } => RequestKind::ExecLua,
            Request::GetCooldown { .. } => RequestKind::GetCooldown,
            Request::GetSpellInfo { .. } => RequestKind::GetSpellInfo,
            Request::CastSpell { .. } => RequestKind::CastSpell,
            Request::IsBehindTarget { .. } => RequestKind::IsBehindTarget,
            Request::MoveTo { .. } => RequestKind::MoveTo,
            Request::IsInRange { .. } => RequestKind::IsInRange,
            Request::Unknown { .. } => RequestKind::Unknown,
        }
    }
}

/// Renders the wire form of the command
impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Ping => f.write_str("ping"),
            Request::GetTimeMs => f.write_str("GET_TIME_MS"),
            Request::GetComboPoints => f.write_str("GET_COMBO_POINTS"),
            Request::GetTargetGuid => f.write_str("GET_TARGET_GUID"),
            Request::ExecLua { code } => write!(f, "EXEC_LUA:{}", code),
            Request::GetCooldown { spell_id } => write!(f, "GET_CD:{}", spell_id),
            Request::GetSpellInfo { spell_id } => write!(f, "GET_SPELL_INFO:{}", spell_id),
            Request::CastSpell {
                spell_id,
                target_guid,
            } => write!(f, "CAST_SPELL:{},{}", spell_id, target_guid),
            Request::IsBehindTarget { target_guid } => {
                write!(f, "IS_BEHIND_TARGET:{:X}", target_guid)
            }
            Request::MoveTo { x, y, z } => write!(f, "MOVE_TO:{},{},{}", x, y, z),
            Request::IsInRange { spell_id, unit_id } => {
                write!(f, "IS_IN_RANGE:{},{}", spell_id, unit_id)
            }
            Request::Unknown { raw } => f.write_str(raw),
        }
    }
}
