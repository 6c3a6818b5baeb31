//! Simulated host: the execution side of the pipe
//!
//! [`SimulatedHost`] answers every command from in-memory game state, and
//! [`spawn_execution_thread`] drives a [`Dispatcher`] over it once per tick,
//! the way a real host would from its main loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use cmdpipe_core::dispatch::{
    CommandHandlers, Dispatcher, HandlerError, HandlerResult, RawSpellInfo, SpellCooldown,
};
use cmdpipe_core::IpcChannel;

/// Global cooldown applied to every successful cast, in seconds
const GLOBAL_COOLDOWN: f64 = 1.5;

/// Most combo points a target can hold
const MAX_COMBO_POINTS: i32 = 5;

/// Cast result codes
const CAST_OK: i32 = 1;
const CAST_FAILED: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn distance(&self, other: &Position) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// A spell the simulated player knows
#[derive(Debug, Clone)]
pub struct Spell {
    pub name: String,
    pub rank: String,
    pub icon: String,
    pub cost: u32,
    pub power_type: i32,
    pub cast_time_ms: u32,
    pub min_range: f32,
    pub max_range: f32,
    /// Cooldown in seconds, on top of the global cooldown
    pub cooldown: f64,
    /// Combo points awarded on a successful cast
    pub combo_points: i32,
}

/// A targetable unit
#[derive(Debug, Clone)]
pub struct Unit {
    pub guid: u64,
    pub position: Position,
    /// Facing in radians, 0 pointing along +x
    pub facing: f32,
}

/// Host state answered over the pipe
pub struct SimulatedHost {
    started: Instant,
    in_world: bool,
    player: Position,
    target: Option<Unit>,
    combo_points: i32,
    spellbook: HashMap<i32, Spell>,
    cooldowns: HashMap<i32, SpellCooldown>,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    /// Player in the world with a small spellbook and a target ahead
    pub fn new() -> Self {
        let mut host = Self::empty();
        // id, name, icon, cost, power type, cast ms, min/max range, cooldown, combo points
        let spells = [
            (133, "Fireball", "Spell_Fire_FlameBolt", 30, 0, 1500, 0.0, 35.0, 0.0, 0),
            (1752, "Sinister Strike", "Spell_Shadow_RitualOfSacrifice", 45, 3, 0, 0.0, 5.0, 0.0, 1),
            (2098, "Eviscerate", "Ability_Rogue_Eviscerate", 35, 3, 0, 0.0, 5.0, 0.0, 0),
            (2983, "Sprint", "Ability_Rogue_Sprint", 0, 3, 0, 0.0, 0.0, 300.0, 0),
        ];
        for (id, name, icon, cost, power_type, cast_ms, min, max, cooldown, points) in spells {
            host.learn(
                id,
                Spell {
                    name: name.to_string(),
                    rank: "Rank 1".to_string(),
                    icon: format!("Interface\\Icons\\{}", icon),
                    cost,
                    power_type,
                    cast_time_ms: cast_ms,
                    min_range: min,
                    max_range: max,
                    cooldown,
                    combo_points: points,
                },
            );
        }
        host.target = Some(Unit {
            guid: 0xF130_0000_1234_ABCD,
            position: Position::new(20.0, 0.0, 0.0),
            facing: std::f32::consts::PI,
        });
        host
    }

    /// Player in the world with nothing known and nothing targeted
    pub fn empty() -> Self {
        Self {
            started: Instant::now(),
            in_world: true,
            player: Position::new(0.0, 0.0, 0.0),
            target: None,
            combo_points: 0,
            spellbook: HashMap::new(),
            cooldowns: HashMap::new(),
        }
    }

    pub fn learn(&mut self, spell_id: i32, spell: Spell) {
        self.spellbook.insert(spell_id, spell);
    }

    pub fn set_target(&mut self, target: Option<Unit>) {
        if self.target.as_ref().map(|t| t.guid) != target.as_ref().map(|t| t.guid) {
            self.combo_points = 0;
        }
        self.target = target;
    }

    /// Simulate leaving the world (loading screen, logout)
    pub fn set_in_world(&mut self, in_world: bool) {
        self.in_world = in_world;
    }

    pub fn player_position(&self) -> Position {
        self.player
    }

    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn require_player(&self) -> HandlerResult<()> {
        if self.in_world {
            Ok(())
        } else {
            Err(HandlerError::NoPlayer)
        }
    }

    fn known_spell(&self, spell_id: i32) -> HandlerResult<&Spell> {
        self.spellbook
            .get(&spell_id)
            .ok_or_else(|| HandlerError::Failed(format!("unknown spell {}", spell_id)))
    }

    fn unit_position(&self, unit_id: &str) -> Option<Position> {
        match unit_id.to_ascii_lowercase().as_str() {
            "player" => Some(self.player),
            "target" => self.target.as_ref().map(|t| t.position),
            _ => None,
        }
    }

    fn on_cooldown(&self, spell_id: i32, now: f64) -> bool {
        self.cooldowns
            .get(&spell_id)
            .is_some_and(|cd| cd.enabled && now < cd.start + cd.duration)
    }
}

impl CommandHandlers for SimulatedHost {
    /// Only `return` lists of literals are understood; anything else runs
    /// for side effects and yields nothing.
    fn exec_lua(&mut self, code: &str) -> HandlerResult<String> {
        let code = code.trim();
        if code.is_empty() {
            return Ok("LUA_RESULT:ERROR:empty chunk".to_string());
        }
        let Some(values) = code.strip_prefix("return ") else {
            return Ok(String::new());
        };
        let values: Vec<&str> = values
            .split(',')
            .map(|v| v.trim().trim_matches(|c| c == '"' || c == '\''))
            .collect();
        Ok(values.join(","))
    }

    fn time_ms(&mut self) -> HandlerResult<i64> {
        Ok(self.started.elapsed().as_millis() as i64)
    }

    fn spell_cooldown(&mut self, spell_id: i32) -> HandlerResult<SpellCooldown> {
        self.require_player()?;
        self.known_spell(spell_id)?;
        let now = self.now();
        match self.cooldowns.get(&spell_id) {
            Some(cd) if self.on_cooldown(spell_id, now) => Ok(*cd),
            _ => Ok(SpellCooldown {
                start: 0.0,
                duration: 0.0,
                enabled: true,
            }),
        }
    }

    fn is_spell_in_range(&mut self, spell_id: i32, unit_id: &str) -> HandlerResult<bool> {
        self.require_player()?;
        let spell = self.known_spell(spell_id)?;
        let (min, max) = (spell.min_range, spell.max_range);
        let position = self
            .unit_position(unit_id)
            .ok_or(HandlerError::NoTarget)?;
        let distance = self.player.distance(&position);
        Ok(distance >= min && distance <= max)
    }

    fn spell_info(&mut self, spell_id: i32) -> HandlerResult<RawSpellInfo> {
        let Some(spell) = self.spellbook.get(&spell_id) else {
            return Ok(RawSpellInfo::default());
        };
        Ok(RawSpellInfo {
            name: Some(spell.name.clone()),
            rank: Some(spell.rank.clone()),
            icon: Some(spell.icon.clone()),
            cost: Some(spell.cost.to_string()),
            power_type: Some(spell.power_type.to_string()),
            cast_time: Some(spell.cast_time_ms.to_string()),
            min_range: Some(spell.min_range.to_string()),
            max_range: Some(spell.max_range.to_string()),
        })
    }

    fn cast_spell(&mut self, spell_id: i32, target_guid: u64) -> HandlerResult<i32> {
        self.require_player()?;
        let Some(spell) = self.spellbook.get(&spell_id).cloned() else {
            return Ok(CAST_FAILED);
        };

        let now = self.now();
        if self.on_cooldown(spell_id, now) {
            return Ok(CAST_FAILED);
        }

        if target_guid != 0 && self.target.as_ref().map(|t| t.guid) != Some(target_guid) {
            return Ok(CAST_FAILED);
        }

        if spell.max_range > 0.0 {
            let Some(target) = &self.target else {
                return Ok(CAST_FAILED);
            };
            let distance = self.player.distance(&target.position);
            if distance < spell.min_range || distance > spell.max_range {
                return Ok(CAST_FAILED);
            }
        }

        self.cooldowns.insert(
            spell_id,
            SpellCooldown {
                start: now,
                duration: GLOBAL_COOLDOWN.max(spell.cooldown),
                enabled: true,
            },
        );
        self.combo_points = (self.combo_points + spell.combo_points).min(MAX_COMBO_POINTS);
        tracing::debug!("Cast {} ({})", spell.name, spell_id);
        Ok(CAST_OK)
    }

    fn combo_points(&mut self) -> HandlerResult<i32> {
        self.require_player()?;
        Ok(if self.target.is_some() {
            self.combo_points
        } else {
            0
        })
    }

    fn target_guid(&mut self) -> HandlerResult<u64> {
        self.require_player()?;
        Ok(self.target.as_ref().map_or(0, |t| t.guid))
    }

    fn is_behind_target(&mut self, target_guid: u64) -> HandlerResult<bool> {
        self.require_player()?;
        let target = self
            .target
            .as_ref()
            .filter(|t| t.guid == target_guid)
            .ok_or(HandlerError::NoTarget)?;

        // Behind means the player is in the half-plane the target faces away from
        let (fx, fy) = (target.facing.cos(), target.facing.sin());
        let (dx, dy) = (
            self.player.x - target.position.x,
            self.player.y - target.position.y,
        );
        Ok(fx * dx + fy * dy < 0.0)
    }

    fn move_to(&mut self, x: f32, y: f32, z: f32) -> HandlerResult<bool> {
        self.require_player()?;
        self.player = Position::new(x, y, z);
        Ok(true)
    }
}

/// Start the execution thread
///
/// Drains the request queue once per `tick` until the channel stops, and
/// hands the dispatcher back when joined.
pub fn spawn_execution_thread<H>(
    channel: Arc<IpcChannel>,
    handlers: H,
    tick: Duration,
) -> Result<JoinHandle<Dispatcher<H>>>
where
    H: CommandHandlers + Send + 'static,
{
    thread::Builder::new()
        .name("cmdpipe-exec".to_string())
        .spawn(move || {
            let mut dispatcher = Dispatcher::new(handlers);
            tracing::debug!("Execution thread started (tick {}ms)", tick.as_millis());
            while channel.is_running() {
                let processed = dispatcher.drain(&channel);
                if processed > 0 {
                    tracing::debug!("Processed {} request(s)", processed);
                }
                thread::sleep(tick);
            }
            tracing::debug!("Execution thread finished");
            dispatcher
        })
        .context("Failed to spawn execution thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdpipe_core::{parse_command, Request};
    use pretty_assertions::assert_eq;

    fn respond(host: SimulatedHost, command: &str) -> String {
        Dispatcher::new(host).dispatch(&parse_command(command))
    }

    #[test]
    fn test_cast_starts_cooldown_and_blocks_recast() {
        let mut dispatcher = Dispatcher::new(SimulatedHost::new());
        assert_eq!(dispatcher.dispatch(&parse_command("GET_CD:133")), "CD:0,0,1");
        assert_eq!(
            dispatcher.dispatch(&parse_command("CAST_SPELL:133,0")),
            "CAST_RESULT:133,1"
        );
        assert_eq!(
            dispatcher.dispatch(&parse_command("CAST_SPELL:133,0")),
            "CAST_RESULT:133,0"
        );

        let cd = dispatcher.dispatch(&parse_command("GET_CD:133"));
        assert!(cd.starts_with("CD:"), "{}", cd);
        assert!(cd.ends_with(",1500,1"), "{}", cd);
    }

    #[test]
    fn test_cast_rejects_wrong_target_and_range() {
        assert_eq!(
            respond(SimulatedHost::new(), "CAST_SPELL:133,42"),
            "CAST_RESULT:133,0"
        );
        // Melee spell, target is 20 yards away
        assert_eq!(
            respond(SimulatedHost::new(), "CAST_SPELL:1752,0"),
            "CAST_RESULT:1752,0"
        );
        assert_eq!(
            respond(SimulatedHost::new(), "CAST_SPELL:99999,0"),
            "CAST_RESULT:99999,0"
        );
    }

    #[test]
    fn test_no_player_is_reported() {
        let mut host = SimulatedHost::new();
        host.set_in_world(false);
        let mut dispatcher = Dispatcher::new(host);
        assert_eq!(
            dispatcher.dispatch(&parse_command("MOVE_TO:1,2,3")),
            "MOVE_TO_RESULT:ERROR:player null"
        );
        assert_eq!(
            dispatcher.dispatch(&parse_command("GET_COMBO_POINTS")),
            "ERR:Exception processing command - player null"
        );
    }

    #[test]
    fn test_range_and_movement() {
        let mut dispatcher = Dispatcher::new(SimulatedHost::new());
        assert_eq!(
            dispatcher.dispatch(&parse_command("IS_IN_RANGE:133,target")),
            "IN_RANGE:1"
        );
        assert_eq!(
            dispatcher.dispatch(&parse_command("IS_IN_RANGE:1752,target")),
            "IN_RANGE:0"
        );

        assert_eq!(
            dispatcher.dispatch(&parse_command("MOVE_TO:18,0,0")),
            "MOVE_TO_RESULT:1"
        );
        assert_eq!(dispatcher.handlers().player_position(), Position::new(18.0, 0.0, 0.0));
        assert_eq!(
            dispatcher.dispatch(&parse_command("IS_IN_RANGE:1752,target")),
            "IN_RANGE:1"
        );
    }

    #[test]
    fn test_combo_points_build_and_cap() {
        let mut dispatcher = Dispatcher::new(SimulatedHost::new());
        dispatcher.dispatch(&parse_command("MOVE_TO:19,0,0"));
        assert_eq!(dispatcher.dispatch(&parse_command("GET_COMBO_POINTS")), "CP:0");

        assert_eq!(
            dispatcher.dispatch(&parse_command("CAST_SPELL:1752,0")),
            "CAST_RESULT:1752,1"
        );
        assert_eq!(dispatcher.dispatch(&parse_command("GET_COMBO_POINTS")), "CP:1");

        dispatcher.handlers_mut().combo_points = 7;
        dispatcher.handlers_mut().cooldowns.clear();
        dispatcher.dispatch(&parse_command("CAST_SPELL:1752,0"));
        assert_eq!(dispatcher.dispatch(&parse_command("GET_COMBO_POINTS")), "CP:5");
    }

    #[test]
    fn test_behind_target() {
        let mut dispatcher = Dispatcher::new(SimulatedHost::new());
        // Target at x=20 facing -x, player at origin is in front of it
        assert_eq!(
            dispatcher.dispatch(&parse_command("IS_BEHIND_TARGET:F13000001234ABCD")),
            "[IS_BEHIND_TARGET_OK:0]"
        );
        dispatcher.dispatch(&parse_command("MOVE_TO:25,0,0"));
        assert_eq!(
            dispatcher.dispatch(&parse_command("IS_BEHIND_TARGET:0xF13000001234ABCD")),
            "[IS_BEHIND_TARGET_OK:1]"
        );
        assert_eq!(
            dispatcher.dispatch(&parse_command("IS_BEHIND_TARGET:1")),
            "[IS_BEHIND_TARGET_ERR:no target]"
        );
    }

    #[test]
    fn test_target_guid_and_clearing_target() {
        let mut dispatcher = Dispatcher::new(SimulatedHost::new());
        assert_eq!(
            dispatcher.dispatch(&Request::GetTargetGuid),
            "TARGET_GUID:0xF13000001234ABCD"
        );
        dispatcher.handlers_mut().set_target(None);
        assert_eq!(dispatcher.dispatch(&Request::GetTargetGuid), "TARGET_GUID:0x0");
        assert_eq!(dispatcher.dispatch(&Request::GetComboPoints), "CP:0");
    }

    #[test]
    fn test_spell_info_known_and_unknown() {
        assert_eq!(
            respond(SimulatedHost::new(), "GET_SPELL_INFO:133"),
            "SPELL_INFO:Fireball|Rank 1|1500|0.0|35.0|Interface\\Icons\\Spell_Fire_FlameBolt|30|0"
        );
        assert_eq!(
            respond(SimulatedHost::new(), "GET_SPELL_INFO:4"),
            "SPELL_INFO:N/A|N/A|-1|-1.0|-1.0|N/A|0|-1"
        );
    }

    #[test]
    fn test_exec_lua() {
        assert_eq!(
            respond(SimulatedHost::new(), "EXEC_LUA:return 1, \"two\", 3"),
            "LUA_RESULT:1,two,3"
        );
        assert_eq!(
            respond(SimulatedHost::new(), "EXEC_LUA:DoEmote(\"dance\")"),
            "LUA_RESULT:nil"
        );
        assert_eq!(
            respond(SimulatedHost::new(), "EXEC_LUA:   "),
            "LUA_RESULT:ERROR:empty chunk"
        );
    }

    #[test]
    fn test_execution_thread_drains_until_stopped() {
        let channel = Arc::new(IpcChannel::new());
        let handle = spawn_execution_thread(
            channel.clone(),
            SimulatedHost::new(),
            Duration::from_millis(1),
        )
        .unwrap();

        channel.push_request(Request::Ping);
        let response = channel.wait_response(Duration::from_secs(2), Duration::from_millis(5));
        assert_eq!(response.as_deref(), Some("PONG"));

        channel.stop();
        let dispatcher = handle.join().unwrap();
        assert_eq!(dispatcher.handlers().player_position(), Position::new(0.0, 0.0, 0.0));
    }
}
