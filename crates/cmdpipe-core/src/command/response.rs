//! Decoding of tagged responses on the client side

use serde::Serialize;
use thiserror::Error;

use crate::command::Request;
use crate::ipc::protocol::tag;

/// Common prefix of both is-behind-target answers
const BEHIND_TARGET_ANY: &str = "[IS_BEHIND_TARGET_";

/// A response that could not be turned into a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// The server answered with an error tag
    #[error("remote error: {0}")]
    Remote(String),

    /// The response did not have the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Cooldown state in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CooldownStatus {
    pub start_ms: i64,
    pub duration_ms: i64,
    pub enabled: bool,
}

impl CooldownStatus {
    /// Whether the spell is ready at host time `now_ms`
    pub fn is_ready_at(&self, now_ms: i64) -> bool {
        self.start_ms == 0 || self.duration_ms == 0 || now_ms >= self.start_ms + self.duration_ms
    }
}

/// Spell information; `None` where the server sent `N/A`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpellInfo {
    pub name: Option<String>,
    pub rank: Option<String>,
    pub cast_time_ms: f64,
    pub min_range: f64,
    pub max_range: f64,
    pub icon: Option<String>,
    pub cost: f64,
    pub power_type: i32,
}

/// Outcome of a cast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CastResult {
    pub spell_id: i32,
    pub code: i32,
}

/// A decoded response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParsedResponse {
    Pong,
    TimeMs(i64),
    Cooldown(CooldownStatus),
    InRange(bool),
    SpellInfo(SpellInfo),
    Cast(CastResult),
    ComboPoints(i32),
    TargetGuid(u64),
    BehindTarget(bool),
    Moved(bool),
    Lua(Vec<String>),
}

/// Tag a response to `request` is expected to start with
///
/// `None` for unknown commands, which can only be answered with an error.
pub fn expected_prefix(request: &Request) -> Option<&'static str> {
    match request {
        Request::Ping => Some(tag::PONG),
        Request::GetTimeMs => Some(tag::TIME_MS),
        Request::GetComboPoints => Some(tag::COMBO_POINTS),
        Request::GetTargetGuid => Some(tag::TARGET_GUID),
        Request::ExecLua { .. } => Some(tag::LUA_RESULT),
        Request::GetCooldown { .. } => Some(tag::COOLDOWN),
        Request::GetSpellInfo { .. } => Some(tag::SPELL_INFO),
        Request::CastSpell { .. } => Some(tag::CAST_RESULT),
        Request::IsBehindTarget { .. } => Some(BEHIND_TARGET_ANY),
        Request::MoveTo { .. } => Some(tag::MOVE_TO_RESULT),
        Request::IsInRange { .. } => Some(tag::IN_RANGE),
        Request::Unknown { .. } => None,
    }
}

/// Whether `response` can be the answer to `request`
pub fn answers(request: &Request, response: &str) -> bool {
    if response.starts_with(tag::ERROR) {
        return true;
    }
    match expected_prefix(request) {
        Some(prefix) => response.starts_with(prefix),
        None => false,
    }
}

/// Decode the response to `request`
pub fn parse_response(request: &Request, response: &str) -> Result<ParsedResponse, ResponseError> {
    if let Some(message) = response.strip_prefix(tag::ERROR) {
        return Err(ResponseError::Remote(message.to_string()));
    }
    match request {
        Request::Ping => parse_pong(response).map(|_| ParsedResponse::Pong),
        Request::GetTimeMs => parse_time_ms(response).map(ParsedResponse::TimeMs),
        Request::GetComboPoints => parse_combo_points(response).map(ParsedResponse::ComboPoints),
        Request::GetTargetGuid => parse_target_guid(response).map(ParsedResponse::TargetGuid),
        Request::ExecLua { .. } => parse_lua(response).map(ParsedResponse::Lua),
        Request::GetCooldown { .. } => parse_cooldown(response).map(ParsedResponse::Cooldown),
        Request::GetSpellInfo { .. } => parse_spell_info(response).map(ParsedResponse::SpellInfo),
        Request::CastSpell { .. } => parse_cast_result(response).map(ParsedResponse::Cast),
        Request::IsBehindTarget { .. } => {
            parse_behind_target(response).map(ParsedResponse::BehindTarget)
        }
        Request::MoveTo { .. } => parse_move_to(response).map(ParsedResponse::Moved),
        Request::IsInRange { .. } => parse_in_range(response).map(ParsedResponse::InRange),
        Request::Unknown { .. } => Err(ResponseError::Malformed(response.to_string())),
    }
}

fn malformed(response: &str) -> ResponseError {
    ResponseError::Malformed(response.to_string())
}

fn body<'a>(response: &'a str, prefix: &str) -> Result<&'a str, ResponseError> {
    if let Some(message) = response.strip_prefix(tag::ERROR) {
        return Err(ResponseError::Remote(message.to_string()));
    }
    response.strip_prefix(prefix).ok_or_else(|| malformed(response))
}

fn flag(text: &str, response: &str) -> Result<bool, ResponseError> {
    match text {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(malformed(response)),
    }
}

fn number<T: std::str::FromStr>(text: &str, response: &str) -> Result<T, ResponseError> {
    text.parse().map_err(|_| malformed(response))
}

fn optional_text(text: &str) -> Option<String> {
    (text != "N/A").then(|| text.to_string())
}

/// `PONG`
pub fn parse_pong(response: &str) -> Result<(), ResponseError> {
    if response == tag::PONG {
        return Ok(());
    }
    match response.strip_prefix(tag::ERROR) {
        Some(message) => Err(ResponseError::Remote(message.to_string())),
        None => Err(malformed(response)),
    }
}

/// `TIME_MS:<ms>`
pub fn parse_time_ms(response: &str) -> Result<i64, ResponseError> {
    number(body(response, tag::TIME_MS)?, response)
}

/// `CP:<points>`
pub fn parse_combo_points(response: &str) -> Result<i32, ResponseError> {
    number(body(response, tag::COMBO_POINTS)?, response)
}

/// `TARGET_GUID:0x<HEX>`
pub fn parse_target_guid(response: &str) -> Result<u64, ResponseError> {
    let hex = body(response, tag::TARGET_GUID)?;
    let hex = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .unwrap_or(hex);
    u64::from_str_radix(hex, 16).map_err(|_| malformed(response))
}

/// `CD:<start_ms>,<duration_ms>,<0|1>`
pub fn parse_cooldown(response: &str) -> Result<CooldownStatus, ResponseError> {
    let fields: Vec<&str> = body(response, tag::COOLDOWN)?.split(',').collect();
    let [start, duration, enabled] = fields.as_slice() else {
        return Err(malformed(response));
    };
    Ok(CooldownStatus {
        start_ms: number(start, response)?,
        duration_ms: number(duration, response)?,
        enabled: flag(enabled, response)?,
    })
}

/// `IN_RANGE:<0|1>`
pub fn parse_in_range(response: &str) -> Result<bool, ResponseError> {
    flag(body(response, tag::IN_RANGE)?, response)
}

/// `SPELL_INFO:<name>|<rank>|<cast_ms>|<min>|<max>|<icon>|<cost>|<power_type>`
pub fn parse_spell_info(response: &str) -> Result<SpellInfo, ResponseError> {
    let fields: Vec<&str> = body(response, tag::SPELL_INFO)?.split('|').collect();
    let [name, rank, cast_time, min_range, max_range, icon, cost, power_type] = fields.as_slice()
    else {
        return Err(malformed(response));
    };
    Ok(SpellInfo {
        name: optional_text(name),
        rank: optional_text(rank),
        cast_time_ms: number(cast_time, response)?,
        min_range: number(min_range, response)?,
        max_range: number(max_range, response)?,
        icon: optional_text(icon),
        cost: number(cost, response)?,
        power_type: number(power_type, response)?,
    })
}

/// `CAST_RESULT:<spell_id>,<code>` or `CAST_RESULT:ERROR:<reason>`
pub fn parse_cast_result(response: &str) -> Result<CastResult, ResponseError> {
    if let Some(reason) = response.strip_prefix(tag::CAST_ERROR) {
        return Err(ResponseError::Remote(reason.to_string()));
    }
    let (spell_id, code) = body(response, tag::CAST_RESULT)?
        .split_once(',')
        .ok_or_else(|| malformed(response))?;
    Ok(CastResult {
        spell_id: number(spell_id, response)?,
        code: number(code, response)?,
    })
}

/// `[IS_BEHIND_TARGET_OK:<0|1>]` or `[IS_BEHIND_TARGET_ERR:<reason>]`
pub fn parse_behind_target(response: &str) -> Result<bool, ResponseError> {
    if let Some(reason) = response.strip_prefix(tag::BEHIND_TARGET_ERR) {
        return Err(ResponseError::Remote(
            reason.strip_suffix(']').unwrap_or(reason).to_string(),
        ));
    }
    let value = body(response, tag::BEHIND_TARGET_OK)?
        .strip_suffix(']')
        .ok_or_else(|| malformed(response))?;
    flag(value, response)
}

/// `MOVE_TO_RESULT:<0|1>` or `MOVE_TO_RESULT:ERROR:<reason>`
pub fn parse_move_to(response: &str) -> Result<bool, ResponseError> {
    if let Some(reason) = response.strip_prefix(tag::MOVE_TO_ERROR) {
        return Err(ResponseError::Remote(reason.to_string()));
    }
    flag(body(response, tag::MOVE_TO_RESULT)?, response)
}

/// `LUA_RESULT:<values>`, split on commas; an empty result yields no values
pub fn parse_lua(response: &str) -> Result<Vec<String>, ResponseError> {
    if let Some(reason) = response.strip_prefix(tag::LUA_ERROR) {
        return Err(ResponseError::Remote(reason.to_string()));
    }
    let values = body(response, tag::LUA_RESULT)?;
    if values.is_empty() {
        return Ok(Vec::new());
    }
    Ok(values.split(',').map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expected_prefix_by_kind() {
        assert_eq!(expected_prefix(&Request::Ping), Some("PONG"));
        assert_eq!(
            expected_prefix(&Request::GetCooldown { spell_id: 1 }),
            Some("CD:")
        );
        assert_eq!(
            expected_prefix(&Request::Unknown {
                raw: "x".to_string()
            }),
            None
        );
    }

    #[test]
    fn test_answers_skips_stale_responses() {
        let request = Request::GetCooldown { spell_id: 1 };
        assert!(answers(&request, "CD:0,0,0"));
        assert!(answers(&request, "ERR:Exception processing command - crash"));
        assert!(!answers(&request, "TIME_MS:55"));
        assert!(answers(
            &Request::Unknown {
                raw: "x".to_string()
            },
            "ERR:Unknown command type"
        ));
    }

    #[test]
    fn test_behind_target_answers_both_variants() {
        let request = Request::IsBehindTarget { target_guid: 1 };
        assert!(answers(&request, "[IS_BEHIND_TARGET_OK:1]"));
        assert!(answers(&request, "[IS_BEHIND_TARGET_ERR:no target]"));
    }

    #[test]
    fn test_parse_cooldown() {
        assert_eq!(
            parse_cooldown("CD:10500,1500,1").unwrap(),
            CooldownStatus {
                start_ms: 10500,
                duration_ms: 1500,
                enabled: true
            }
        );
        assert!(matches!(
            parse_cooldown("CD:1,2"),
            Err(ResponseError::Malformed(_))
        ));
    }

    #[test]
    fn test_cooldown_ready() {
        let cd = CooldownStatus {
            start_ms: 1000,
            duration_ms: 500,
            enabled: true,
        };
        assert!(!cd.is_ready_at(1200));
        assert!(cd.is_ready_at(1500));
    }

    #[test]
    fn test_parse_spell_info_with_placeholders() {
        let info = parse_spell_info("SPELL_INFO:Fireball|N/A|1500|0.0|35.0|N/A|30|0").unwrap();
        assert_eq!(info.name.as_deref(), Some("Fireball"));
        assert_eq!(info.rank, None);
        assert_eq!(info.icon, None);
        assert_eq!(info.cast_time_ms, 1500.0);
        assert_eq!(info.max_range, 35.0);
        assert_eq!(info.power_type, 0);
    }

    #[test]
    fn test_parse_cast_result() {
        assert_eq!(
            parse_cast_result("CAST_RESULT:133,1").unwrap(),
            CastResult {
                spell_id: 133,
                code: 1
            }
        );
        assert_eq!(
            parse_cast_result("CAST_RESULT:ERROR:func null"),
            Err(ResponseError::Remote("func null".to_string()))
        );
    }

    #[test]
    fn test_parse_target_guid() {
        assert_eq!(
            parse_target_guid("TARGET_GUID:0xF13000001234ABCD").unwrap(),
            0xF130_0000_1234_ABCD
        );
        assert_eq!(parse_target_guid("TARGET_GUID:0x0").unwrap(), 0);
    }

    #[test]
    fn test_parse_behind_target() {
        assert!(parse_behind_target("[IS_BEHIND_TARGET_OK:1]").unwrap());
        assert!(!parse_behind_target("[IS_BEHIND_TARGET_OK:0]").unwrap());
        assert_eq!(
            parse_behind_target("[IS_BEHIND_TARGET_ERR:no target]"),
            Err(ResponseError::Remote("no target".to_string()))
        );
        assert!(parse_behind_target("[IS_BEHIND_TARGET_OK:1").is_err());
    }

    #[test]
    fn test_parse_lua() {
        assert_eq!(parse_lua("LUA_RESULT:1,2,abc").unwrap(), vec!["1", "2", "abc"]);
        assert_eq!(parse_lua("LUA_RESULT:nil").unwrap(), vec!["nil"]);
        assert!(parse_lua("LUA_RESULT:").unwrap().is_empty());
        assert_eq!(
            parse_lua("LUA_RESULT:ERROR:boom"),
            Err(ResponseError::Remote("boom".to_string()))
        );
    }

    #[test]
    fn test_parse_response_generic_error() {
        let result = parse_response(
            &Request::GetTimeMs,
            "ERR:Exception processing command - crash",
        );
        assert_eq!(
            result,
            Err(ResponseError::Remote(
                "Exception processing command - crash".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_response_dispatches_by_request() {
        assert_eq!(
            parse_response(&Request::Ping, "PONG").unwrap(),
            ParsedResponse::Pong
        );
        assert_eq!(
            parse_response(&Request::GetComboPoints, "CP:4").unwrap(),
            ParsedResponse::ComboPoints(4)
        );
        assert_eq!(
            parse_response(&Request::MoveTo { x: 0.0, y: 0.0, z: 0.0 }, "MOVE_TO_RESULT:0")
                .unwrap(),
            ParsedResponse::Moved(false)
        );
        assert!(parse_response(&Request::Ping, "PONGX").is_err());
    }
}
