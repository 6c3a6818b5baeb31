//! Command parser: raw text to typed requests
//!
//! Grammars are tried in a fixed order and the first match wins. Every
//! grammar has its own literal prefix and must cover the whole input, so a
//! command can match at most one of them. Input that matches nothing, or
//! whose numbers do not convert, becomes [`Request::Unknown`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::command::Request;

const EXEC_LUA_PREFIX: &str = "EXEC_LUA:";

/// Longest unit token accepted by `IS_IN_RANGE`
pub const MAX_UNIT_ID_LEN: usize = 63;

const INT: &str = r"[+-]?\d+";
const FLOAT: &str = r"[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?";

static GET_CD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(&format!(r"^GET_CD:({INT})$")).unwrap());
static GET_SPELL_INFO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^GET_SPELL_INFO:({INT})$")).unwrap());
static CAST_SPELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^CAST_SPELL:({INT}),(\+?\d+)$")).unwrap());
static IS_BEHIND_TARGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^IS_BEHIND_TARGET:(?:0[xX])?([0-9A-Fa-f]+)$").unwrap());
static MOVE_TO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^MOVE_TO:({FLOAT}),({FLOAT}),({FLOAT})$")).unwrap()
});
static IS_IN_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^IS_IN_RANGE:({INT}),([^\s,:]{{1,{MAX_UNIT_ID_LEN}}})$"
    ))
    .unwrap()
});

/// Parse one command into a request
///
/// Never fails: unrecognized text yields `Request::Unknown` holding the
/// original command.
pub fn parse_command(command: &str) -> Request {
    let request = match command {
        "ping" => Some(Request::Ping),
        "GET_TIME_MS" => Some(Request::GetTimeMs),
        "GET_COMBO_POINTS" => Some(Request::GetComboPoints),
        "GET_TARGET_GUID" => Some(Request::GetTargetGuid),
        _ => None,
    };

    let request = request
        .or_else(|| parse_exec_lua(command))
        .or_else(|| parse_get_cd(command))
        .or_else(|| parse_get_spell_info(command))
        .or_else(|| parse_cast_spell(command))
        .or_else(|| parse_is_behind_target(command))
        .or_else(|| parse_move_to(command))
        .or_else(|| parse_is_in_range(command));

    match request {
        Some(request) => {
            tracing::debug!(kind = ?request.kind(), "Parsed command");
            request
        }
        None => {
            tracing::debug!(
                "Unknown command received: [{}]",
                crate::ipc::protocol::preview(command, 100)
            );
            Request::Unknown {
                raw: command.to_string(),
            }
        }
    }
}

fn parse_exec_lua(command: &str) -> Option<Request> {
    command
        .strip_prefix(EXEC_LUA_PREFIX)
        .map(|code| Request::ExecLua {
            code: code.to_string(),
        })
}

fn parse_get_cd(command: &str) -> Option<Request> {
    let caps = GET_CD_RE.captures(command)?;
    let spell_id = caps[1].parse().ok()?;
    Some(Request::GetCooldown { spell_id })
}

fn parse_get_spell_info(command: &str) -> Option<Request> {
    let caps = GET_SPELL_INFO_RE.captures(command)?;
    let spell_id = caps[1].parse().ok()?;
    Some(Request::GetSpellInfo { spell_id })
}

fn parse_cast_spell(command: &str) -> Option<Request> {
    let caps = CAST_SPELL_RE.captures(command)?;
    let spell_id = caps[1].parse().ok()?;
    let target_guid = caps[2].parse().ok()?;
    Some(Request::CastSpell {
        spell_id,
        target_guid,
    })
}

fn parse_is_behind_target(command: &str) -> Option<Request> {
    let caps = IS_BEHIND_TARGET_RE.captures(command)?;
    let target_guid = u64::from_str_radix(&caps[1], 16).ok()?;
    Some(Request::IsBehindTarget { target_guid })
}

fn parse_move_to(command: &str) -> Option<Request> {
    let caps = MOVE_TO_RE.captures(command)?;
    let x = parse_finite(&caps[1])?;
    let y = parse_finite(&caps[2])?;
    let z = parse_finite(&caps[3])?;
    Some(Request::MoveTo { x, y, z })
}

fn parse_is_in_range(command: &str) -> Option<Request> {
    let caps = IS_IN_RANGE_RE.captures(command)?;
    let spell_id = caps[1].parse().ok()?;
    Some(Request::IsInRange {
        spell_id,
        unit_id: caps[2].to_string(),
    })
}

fn parse_finite(text: &str) -> Option<f32> {
    text.parse::<f32>().ok().filter(|v| v.is_finite())
}
