//! Command dispatcher: runs requests against the handler table
//!
//! Every request yields exactly one non-empty tagged response, which is
//! pushed onto the channel's response queue. Handler failures, including
//! panics, are turned into error responses so that one bad command never
//! affects the next.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::command::Request;
use crate::dispatch::handlers::{CommandHandlers, HandlerError, RawSpellInfo, SpellCooldown};
use crate::ipc::protocol::{preview, tag};
use crate::ipc::IpcChannel;

const NOT_AVAILABLE: &str = "N/A";
const LUA_NIL: &str = "nil";

/// Runs requests on the execution thread
pub struct Dispatcher<H> {
    handlers: H,
}

impl<H: CommandHandlers> Dispatcher<H> {
    /// Create a dispatcher over a handler table
    pub fn new(handlers: H) -> Self {
        Self { handlers }
    }

    /// Access the handler table
    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    /// Mutable access to the handler table
    pub fn handlers_mut(&mut self) -> &mut H {
        &mut self.handlers
    }

    /// Process every request currently queued on the channel
    ///
    /// Meant to be called once per host tick. Never blocks: the lock is
    /// held only to pop each request. Returns the number processed.
    pub fn drain(&mut self, channel: &IpcChannel) -> usize {
        let mut processed = 0;
        while let Some(request) = channel.pop_request() {
            self.process(request, channel);
            processed += 1;
        }
        processed
    }

    /// Process one request and queue its response
    pub fn process(&mut self, request: Request, channel: &IpcChannel) {
        let response = self.dispatch(&request);
        tracing::debug!("Queuing response: [{}]", preview(&response, 100));
        channel.push_response(response);
    }

    /// Produce the tagged response for a request
    pub fn dispatch(&mut self, request: &Request) -> String {
        tracing::debug!(kind = ?request.kind(), "Processing request");
        let handlers = &mut self.handlers;
        match panic::catch_unwind(AssertUnwindSafe(|| respond(handlers, request))) {
            Ok(response) => response,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!("Handler panicked for {:?}: {}", request.kind(), message);
                exception_response(&message)
            }
        }
    }
}

fn respond<H: CommandHandlers>(handlers: &mut H, request: &Request) -> String {
    match request {
        Request::Ping => tag::PONG.to_string(),

        Request::GetTimeMs => match handlers.time_ms() {
            Ok(ms) => format!("{}{}", tag::TIME_MS, ms),
            Err(e) => handler_failure(&e),
        },

        Request::GetCooldown { spell_id } => match handlers.spell_cooldown(*spell_id) {
            Ok(cd) => format_cooldown(&cd),
            Err(e) => handler_failure(&e),
        },

        Request::IsInRange { spell_id, unit_id } => {
            match handlers.is_spell_in_range(*spell_id, unit_id) {
                Ok(in_range) => format!("{}{}", tag::IN_RANGE, u8::from(in_range)),
                Err(e) => handler_failure(&e),
            }
        }

        Request::GetSpellInfo { spell_id } => match handlers.spell_info(*spell_id) {
            Ok(info) => format_spell_info(&info),
            Err(e) => handler_failure(&e),
        },

        Request::CastSpell {
            spell_id,
            target_guid,
        } => match handlers.cast_spell(*spell_id, *target_guid) {
            Ok(code) => format!("{}{},{}", tag::CAST_RESULT, spell_id, code),
            Err(e) => format!("{}{}", tag::CAST_ERROR, e),
        },

        Request::GetComboPoints => match handlers.combo_points() {
            Ok(points) => format!("{}{}", tag::COMBO_POINTS, points),
            Err(e) => handler_failure(&e),
        },

        Request::GetTargetGuid => match handlers.target_guid() {
            Ok(guid) => format!("{}0x{:X}", tag::TARGET_GUID, guid),
            Err(e) => handler_failure(&e),
        },

        Request::IsBehindTarget { target_guid } => match handlers.is_behind_target(*target_guid)
        {
            Ok(behind) => format!("{}{}]", tag::BEHIND_TARGET_OK, u8::from(behind)),
            Err(e) => format!("{}{}]", tag::BEHIND_TARGET_ERR, e),
        },

        Request::MoveTo { x, y, z } => match handlers.move_to(*x, *y, *z) {
            Ok(moved) => format!("{}{}", tag::MOVE_TO_RESULT, u8::from(moved)),
            Err(e) => format!("{}{}", tag::MOVE_TO_ERROR, e),
        },

        Request::ExecLua { code } => match handlers.exec_lua(code) {
            Ok(result) if result.starts_with(tag::LUA_ERROR) => result,
            Ok(result) if result.is_empty() => format!("{}{}", tag::LUA_RESULT, LUA_NIL),
            Ok(result) => format!("{}{}", tag::LUA_RESULT, result),
            Err(e) => format!("{}{}", tag::LUA_ERROR, e),
        },

        Request::Unknown { raw } => {
            tracing::debug!("Received unknown command: [{}]", preview(raw, 100));
            tag::UNKNOWN_COMMAND.to_string()
        }
    }
}

fn handler_failure(error: &HandlerError) -> String {
    exception_response(&error.to_string())
}

fn exception_response(reason: &str) -> String {
    format!("{}Exception processing command - {}", tag::ERROR, reason)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `CD:<start_ms>,<duration_ms>,<enabled>`
fn format_cooldown(cd: &SpellCooldown) -> String {
    let start_ms = (cd.start * 1000.0) as i64;
    let duration_ms = (cd.duration * 1000.0) as i64;
    format!(
        "{}{},{},{}",
        tag::COOLDOWN,
        start_ms,
        duration_ms,
        u8::from(cd.enabled)
    )
}

/// `SPELL_INFO:<name>|<rank>|<cast_ms>|<min_range>|<max_range>|<icon>|<cost>|<power_type>`
fn format_spell_info(info: &RawSpellInfo) -> String {
    format!(
        "{}{}|{}|{:.0}|{:.1}|{:.1}|{}|{:.0}|{}",
        tag::SPELL_INFO,
        text_or_na(&info.name),
        text_or_na(&info.rank),
        number_or(&info.cast_time, -1.0),
        number_or(&info.min_range, -1.0),
        number_or(&info.max_range, -1.0),
        text_or_na(&info.icon),
        number_or(&info.cost, 0.0),
        integer_or(&info.power_type, -1),
    )
}

fn text_or_na(field: &Option<String>) -> &str {
    match field.as_deref().map(str::trim) {
        None | Some("") | Some(LUA_NIL) => NOT_AVAILABLE,
        Some(text) => text,
    }
}

fn number_or(field: &Option<String>, default: f64) -> f64 {
    field
        .as_deref()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

fn integer_or(field: &Option<String>, default: i32) -> i32 {
    let Some(text) = field.as_deref().map(str::trim) else {
        return default;
    };
    text.parse::<i32>()
        .ok()
        .or_else(|| {
            text.parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(|value| value as i32)
        })
        .unwrap_or(default)
}
