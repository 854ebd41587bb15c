//! UCI text protocol and search bookkeeping, independent of the process.

use crate::models::config::{AiPreset, SEARCH_DEPTH_MAX, SEARCH_DEPTH_MIN};

/// Commands that configure playing strength before a search
pub fn preset_commands(preset: &AiPreset) -> Vec<String> {
    let mut lines = vec![
        "setoption name Ponder value false".to_string(),
        "setoption name Threads value 1".to_string(),
        format!("setoption name Skill Level value {}", preset.skill.min(20)),
    ];
    match preset.elo {
        Some(elo) => {
            lines.push("setoption name UCI_LimitStrength value true".to_string());
            lines.push(format!("setoption name UCI_Elo value {}", elo));
        }
        None => lines.push("setoption name UCI_LimitStrength value false".to_string()),
    }
    lines
}

pub fn search_commands(fen: &str, depth: u32) -> Vec<String> {
    let depth = depth.clamp(SEARCH_DEPTH_MIN, SEARCH_DEPTH_MAX);
    vec![format!("position fen {}", fen), format!("go depth {}", depth)]
}

/// Line printed by the engine, reduced to what the adapter cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    UciOk,
    ReadyOk,
    /// `None` for `bestmove (none)`
    BestMove(Option<String>),
    Other,
}

pub fn parse_engine_line(line: &str) -> EngineLine {
    let mut words = line.split_whitespace();
    match words.next() {
        Some("uciok") => EngineLine::UciOk,
        Some("readyok") => EngineLine::ReadyOk,
        Some("bestmove") => match words.next() {
            Some("(none)") | None => EngineLine::BestMove(None),
            Some(mv) => EngineLine::BestMove(Some(mv.to_string())),
        },
        _ => EngineLine::Other,
    }
}

/// One search in flight at a time.
///
/// Every `go` produces exactly one `bestmove`, so a search that was
/// abandoned with `stop` still owes a line. Those lines are counted in
/// `stale` and swallowed before the current search is resolved.
#[derive(Debug)]
pub struct SearchSlot<T> {
    next_id: u64,
    pending: Option<(u64, T)>,
    stale: u32,
}

impl<T> Default for SearchSlot<T> {
    fn default() -> Self {
        SearchSlot {
            next_id: 1,
            pending: None,
            stale: 0,
        }
    }
}

impl<T> SearchSlot<T> {
    /// Register a new search. Returns its id and the one it replaces.
    pub fn begin(&mut self, waiter: T) -> (u64, Option<T>) {
        let id = self.next_id;
        self.next_id += 1;
        let superseded = self.abandon();
        self.pending = Some((id, waiter));
        (id, superseded)
    }

    pub fn is_searching(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_id(&self) -> Option<u64> {
        self.pending.as_ref().map(|(id, _)| *id)
    }

    pub fn pending_mut(&mut self, id: u64) -> Option<&mut T> {
        match &mut self.pending {
            Some((pending, waiter)) if *pending == id => Some(waiter),
            _ => None,
        }
    }

    /// A `bestmove` arrived. Returns the waiter it belongs to, if any.
    pub fn resolve(&mut self) -> Option<T> {
        if self.stale > 0 {
            self.stale -= 1;
            return None;
        }
        self.pending.take().map(|(_, waiter)| waiter)
    }

    /// The search `id` ran out of time. Returns its waiter if still pending.
    pub fn expire(&mut self, id: u64) -> Option<T> {
        if self.pending_id() != Some(id) {
            return None;
        }
        self.abandon()
    }

    /// Drop the pending search; its `bestmove` is still expected
    pub fn abandon(&mut self) -> Option<T> {
        let (_, waiter) = self.pending.take()?;
        self.stale += 1;
        Some(waiter)
    }

    /// The engine is gone; nothing more will arrive
    pub fn reset(&mut self) -> Option<T> {
        self.stale = 0;
        self.pending.take().map(|(_, waiter)| waiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::resolve_ai_preset;

    #[test]
    fn presets_with_elo_limit_strength() {
        let preset = AiPreset {
            id: "test",
            label: "Test",
            skill: 3,
            elo: Some(1350),
        };
        assert_eq!(
            preset_commands(&preset),
            vec![
                "setoption name Ponder value false",
                "setoption name Threads value 1",
                "setoption name Skill Level value 3",
                "setoption name UCI_LimitStrength value true",
                "setoption name UCI_Elo value 1350",
            ]
        );

        let unlimited = resolve_ai_preset("custom");
        assert_eq!(
            preset_commands(unlimited).last().map(String::as_str),
            Some("setoption name UCI_LimitStrength value false")
        );
    }

    #[test]
    fn search_depth_is_clamped() {
        let fen = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        assert_eq!(search_commands(fen, 0)[1], "go depth 1");
        assert_eq!(search_commands(fen, 99)[1], "go depth 20");
        assert_eq!(search_commands(fen, 12)[0], format!("position fen {}", fen));
    }

    #[test]
    fn engine_lines_parse() {
        assert_eq!(parse_engine_line("uciok"), EngineLine::UciOk);
        assert_eq!(parse_engine_line("readyok"), EngineLine::ReadyOk);
        assert_eq!(
            parse_engine_line("bestmove e7e8n ponder a1a2"),
            EngineLine::BestMove(Some("e7e8n".to_string()))
        );
        assert_eq!(parse_engine_line("bestmove (none)"), EngineLine::BestMove(None));
        assert_eq!(parse_engine_line("info depth 12 score cp 30"), EngineLine::Other);
    }

    #[test]
    fn superseded_search_swallows_its_bestmove() {
        let mut slot = SearchSlot::default();
        let (first, replaced) = slot.begin("first");
        assert_eq!(replaced, None);
        let (second, replaced) = slot.begin("second");
        assert_eq!(replaced, Some("first"));
        assert!(second > first);

        // The first search's bestmove comes in after `stop`
        assert_eq!(slot.resolve(), None);
        assert_eq!(slot.resolve(), Some("second"));
        assert!(!slot.is_searching());
    }

    #[test]
    fn expiry_only_hits_the_current_search() {
        let mut slot = SearchSlot::default();
        let (first, _) = slot.begin(1);
        let (second, _) = slot.begin(2);
        assert_eq!(slot.expire(first), None);
        assert_eq!(slot.expire(second), Some(2));
        assert!(!slot.is_searching());

        // Both abandoned searches still owe a bestmove
        let (_, _) = slot.begin(3);
        assert_eq!(slot.resolve(), None);
        assert_eq!(slot.resolve(), None);
        assert_eq!(slot.resolve(), Some(3));
    }

    #[test]
    fn reset_forgets_stale_lines() {
        let mut slot = SearchSlot::default();
        slot.begin(1);
        slot.begin(2);
        assert_eq!(slot.reset(), Some(2));
        slot.begin(3);
        assert_eq!(slot.resolve(), Some(3));
    }
}
