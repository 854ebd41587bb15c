use actix::prelude::*;
use log::{debug, info, warn};
use std::mem;
use std::time::Instant;

use crate::controller::{
    ClickOutcome, ClickSquare, EngineState, LeaveGame, NetScreen, Resign, SessionController, StartGame,
    SubmitMove, AI_OPENING_DELAY,
};
use crate::engine::{resolve_engine_move, think_delay, NewGame, Search, Shutdown, UciEngine};
use crate::error::MoveRejected;
use crate::game::{Color, GameStatus, Square};
use crate::models::config::{clamp_depth, resolve_ai_level, AiMode};
use crate::models::{AppliedMove, GameMessage, GameMode, GameSession, MoveRequest, Tick};
use crate::net::{move_message, PresenceStatus};

impl SessionController {
    pub fn start_game(
        &mut self,
        mode: GameMode,
        color: Color,
        time_control_id: &str,
        ctx: &mut Context<Self>,
    ) {
        info!("Starting {:?} game as {}", mode, color.label());

        if mode != GameMode::Network {
            self.disconnect_net();
            self.net_screen = NetScreen::None;
        }

        // Any think cycle from the previous game is now stale
        self.think_token += 1;
        self.ai_thinking = false;
        self.pending_think = None;

        self.session = GameSession::start(mode, color, time_control_id, Instant::now());
        self.clear_selection();

        if mode == GameMode::Ai && self.ai_level.mode == AiMode::Engine {
            self.ensure_engine(ctx);
        } else {
            self.shutdown_engine();
        }

        let status = if mode == GameMode::Network {
            PresenceStatus::Playing
        } else {
            PresenceStatus::Lobby
        };
        self.set_presence_status(status);

        if mode == GameMode::Ai && color == Color::Black {
            ctx.run_later(AI_OPENING_DELAY, |act, ctx| {
                if act.ai_to_move() {
                    act.schedule_ai(ctx);
                }
            });
        }
    }

    /// Apply a move made on this side of the board
    pub fn apply_local_move(
        &mut self,
        request: MoveRequest,
        ctx: &mut Context<Self>,
    ) -> Result<AppliedMove, MoveRejected> {
        // Settle the clock first so a flag-fall is reported like any other
        self.on_clock_tick(ctx);

        if !self.session.is_local_turn() {
            let [row, col] = request.from;
            return Err(match self.session.status() {
                GameStatus::Idle => MoveRejected::NotStarted,
                status if status.is_terminal() => MoveRejected::GameOver,
                _ => match Square::from_coords(row, col) {
                    Some(square) => MoveRejected::WrongTurn(square.to_string()),
                    None => MoveRejected::OutOfRange(row, col),
                },
            });
        }

        let applied = self.session.make_move(request, Instant::now())?;
        self.clear_selection();

        if self.session.mode() == Some(GameMode::Network) {
            self.send_game_message(&move_message(&applied));
        }
        self.after_move(ctx);
        Ok(applied)
    }

    /// Follow-up shared by every move source
    fn after_move(&mut self, ctx: &mut Context<Self>) {
        if !self.session.is_live() {
            self.on_game_over();
            return;
        }
        if self.ai_to_move() {
            self.schedule_ai(ctx);
        }
    }

    pub fn on_game_over(&mut self) {
        info!("Game over: {}", self.session.status_line());
        self.think_token += 1;
        self.ai_thinking = false;
        self.pending_think = None;
        self.clear_selection();
        if self.session.mode() == Some(GameMode::Network) {
            self.set_presence_status(PresenceStatus::Lobby);
        }
    }

    pub fn on_clock_tick(&mut self, _ctx: &mut Context<Self>) {
        if let Tick::Flagged(color) = self.session.tick(Instant::now()) {
            info!("{} flagged", color.label());
            if self.session.mode() == Some(GameMode::Network) {
                self.send_game_message(&GameMessage::Timeout { color });
            }
            self.on_game_over();
        }
    }

    pub fn ai_to_move(&self) -> bool {
        self.session.mode() == Some(GameMode::Ai)
            && self.session.is_live()
            && self.session.turn() != self.session.player_color()
    }

    fn think_is_current(&self, token: u64) -> bool {
        token == self.think_token && self.ai_to_move()
    }

    /// Start a think cycle after the level's delay
    pub fn schedule_ai(&mut self, ctx: &mut Context<Self>) {
        self.think_token += 1;
        let token = self.think_token;
        self.ai_thinking = true;
        let delay = think_delay(self.ai_level.mode);
        debug!("AI think {} in {:?}", token, delay);
        ctx.run_later(delay, move |act, ctx| act.think(token, ctx));
    }

    fn think(&mut self, token: u64, ctx: &mut Context<Self>) {
        if !self.think_is_current(token) {
            return;
        }
        if self.ai_level.mode == AiMode::Random {
            self.play_ai_move(token, None);
            return;
        }

        let engine = match &self.engine {
            EngineState::Ready(addr) => addr.clone(),
            EngineState::Launching { .. } => {
                debug!("Engine still launching, think {} waits", token);
                self.pending_think = Some(token);
                return;
            }
            EngineState::Stopped | EngineState::Unavailable => {
                self.play_ai_move(token, None);
                return;
            }
        };

        let search = Search {
            fen: self.session.fen(),
            depth: self.search_depth,
            preset: self.ai_level.preset(),
            timeout: self.settings.search_timeout,
        };
        engine
            .send(search)
            .into_actor(self)
            .map(move |res, act, _| {
                let best = match res {
                    Ok(Ok(best)) => Some(best),
                    Ok(Err(e)) => {
                        warn!("Search {} failed: {}", token, e);
                        None
                    }
                    Err(e) => {
                        warn!("Engine is gone: {}", e);
                        act.engine = EngineState::Unavailable;
                        None
                    }
                };
                act.play_ai_move(token, best.as_deref());
            })
            .spawn(ctx);
    }

    /// Apply the opponent's move if the think cycle is still the current one
    fn play_ai_move(&mut self, token: u64, best: Option<&str>) {
        if !self.think_is_current(token) {
            debug!("Dropping stale think {}", token);
            return;
        }
        self.ai_thinking = false;

        let mv = match resolve_engine_move(self.session.position(), best) {
            Some(mv) => mv,
            None => return,
        };
        match self.session.make_move(MoveRequest::from(mv), Instant::now()) {
            Ok(applied) => info!("AI played {}", applied.uci),
            Err(e) => {
                warn!("AI move rejected: {}", e);
                return;
            }
        }
        self.clear_selection();
        if !self.session.is_live() {
            self.on_game_over();
        }
    }

    pub fn ensure_engine(&mut self, ctx: &mut Context<Self>) {
        match &self.engine {
            EngineState::Ready(addr) => {
                addr.do_send(NewGame);
                return;
            }
            EngineState::Launching { .. } => return,
            EngineState::Stopped | EngineState::Unavailable => {}
        }

        let generation = self.next_id();
        self.engine = EngineState::Launching { generation };

        let mut parts = self.settings.engine_path.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        let args: Vec<String> = parts.collect();
        let ready_timeout = self.settings.engine_ready_timeout;
        info!("Launching engine {}", program);

        async move { UciEngine::launch(&program, &args, ready_timeout).await }
            .into_actor(self)
            .map(move |res, act, ctx| {
                let current = matches!(act.engine, EngineState::Launching { generation: g } if g == generation);
                match res {
                    Ok(addr) if current => {
                        addr.do_send(NewGame);
                        act.engine = EngineState::Ready(addr);
                    }
                    Ok(addr) => {
                        // Nobody wants this engine any more
                        addr.do_send(Shutdown);
                        return;
                    }
                    Err(e) if current => {
                        warn!("Engine unavailable, falling back to random moves: {}", e);
                        act.engine = EngineState::Unavailable;
                        act.message = "Engine unavailable: playing random moves".to_string();
                    }
                    Err(e) => {
                        debug!("Stale engine launch failed: {}", e);
                        return;
                    }
                }
                if let Some(token) = act.pending_think.take() {
                    act.think(token, ctx);
                }
            })
            .spawn(ctx);
    }

    pub fn shutdown_engine(&mut self) {
        self.pending_think = None;
        if let EngineState::Ready(addr) = mem::replace(&mut self.engine, EngineState::Stopped) {
            addr.do_send(Shutdown);
        }
    }

    pub fn handle_click(&mut self, row: i32, col: i32, ctx: &mut Context<Self>) -> ClickOutcome {
        if !self.session.is_live() || !self.session.is_local_turn() {
            return ClickOutcome::Ignored;
        }
        let square = match Square::from_coords(row, col) {
            Some(square) => square,
            None => return ClickOutcome::Ignored,
        };

        // A highlighted destination completes the move
        if let Some(mv) = self.legal_targets.iter().find(|mv| mv.to == square).copied() {
            return match self.apply_local_move(MoveRequest::from(mv), ctx) {
                Ok(applied) => ClickOutcome::Moved(applied.uci),
                Err(e) => ClickOutcome::Rejected(e),
            };
        }

        match self.session.position().piece_at(square) {
            Some(piece) if piece.color == self.session.turn() => {
                self.selected = Some(square);
                self.legal_targets = self.session.legal_moves_from(square);
                ClickOutcome::Selected(self.legal_targets.len())
            }
            _ => {
                self.clear_selection();
                ClickOutcome::Deselected
            }
        }
    }

    pub fn handle_resign(&mut self) {
        let color = match self.session.mode() {
            Some(GameMode::Network) | Some(GameMode::Ai) => Some(self.session.player_color()),
            _ => None,
        };
        let resigned = match self.session.resign(color) {
            Some(resigned) => resigned,
            None => return,
        };
        if self.session.mode() == Some(GameMode::Network) {
            self.send_game_message(&GameMessage::Resign { color: resigned });
        }
        self.on_game_over();
    }
}

impl Handler<StartGame> for SessionController {
    type Result = ();

    fn handle(&mut self, msg: StartGame, ctx: &mut Context<Self>) {
        if let Some(level) = msg.ai_level.as_deref() {
            self.ai_level = resolve_ai_level(level);
        }
        self.search_depth = match msg.search_depth {
            Some(depth) => clamp_depth(Some(depth)),
            None => self.ai_level.depth,
        };
        self.message.clear();
        self.start_game(msg.mode, msg.color, &msg.time_control_id, ctx);
    }
}

impl Handler<ClickSquare> for SessionController {
    type Result = ClickOutcome;

    fn handle(&mut self, msg: ClickSquare, ctx: &mut Context<Self>) -> ClickOutcome {
        self.handle_click(msg.row, msg.col, ctx)
    }
}

impl Handler<SubmitMove> for SessionController {
    type Result = Result<AppliedMove, MoveRejected>;

    fn handle(&mut self, msg: SubmitMove, ctx: &mut Context<Self>) -> Self::Result {
        self.apply_local_move(msg.0, ctx)
    }
}

impl Handler<Resign> for SessionController {
    type Result = ();

    fn handle(&mut self, _: Resign, _: &mut Context<Self>) {
        self.handle_resign();
    }
}

impl Handler<LeaveGame> for SessionController {
    type Result = ();

    fn handle(&mut self, _: LeaveGame, _: &mut Context<Self>) {
        info!("Leaving game");
        self.disconnect_net();
        self.think_token += 1;
        self.ai_thinking = false;
        self.shutdown_engine();
        self.session = GameSession::idle();
        self.clear_selection();
        self.challenges.outgoing = None;
        self.net_screen = NetScreen::None;
        self.set_presence_status(PresenceStatus::Lobby);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{GetSnapshot, Shutdown as StopController};
    use crate::models::config::Settings;
    use std::time::Duration;

    fn controller() -> Addr<SessionController> {
        SessionController::new(Settings::default()).start()
    }

    fn start(mode: GameMode, color: Color, ai_level: Option<&str>) -> StartGame {
        StartGame {
            mode,
            color,
            time_control_id: "casual".to_string(),
            ai_level: ai_level.map(str::to_string),
            search_depth: None,
        }
    }

    #[actix_rt::test]
    async fn clicks_select_then_move() {
        let addr = controller();
        addr.send(start(GameMode::Local, Color::White, None)).await.unwrap();

        // Empty square and enemy piece do nothing useful
        assert_eq!(addr.send(ClickSquare { row: 4, col: 4 }).await.unwrap(), ClickOutcome::Deselected);
        assert_eq!(addr.send(ClickSquare { row: 1, col: 4 }).await.unwrap(), ClickOutcome::Deselected);

        assert_eq!(addr.send(ClickSquare { row: 6, col: 4 }).await.unwrap(), ClickOutcome::Selected(2));
        let snapshot = addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.selected, Some([6, 4]));
        assert!(snapshot.legal_targets.contains(&[4, 4]));

        assert_eq!(
            addr.send(ClickSquare { row: 4, col: 4 }).await.unwrap(),
            ClickOutcome::Moved("e2e4".to_string())
        );
        let snapshot = addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.turn, Color::Black);
        assert_eq!(snapshot.selected, None);
        assert_eq!(snapshot.history, vec!["e2e4".to_string()]);

        addr.send(StopController).await.unwrap();
    }

    #[actix_rt::test]
    async fn clicks_are_ignored_before_a_game() {
        let addr = controller();
        assert_eq!(addr.send(ClickSquare { row: 6, col: 4 }).await.unwrap(), ClickOutcome::Ignored);
        assert_eq!(
            addr.send(SubmitMove(MoveRequest::new([6, 4], [4, 4]))).await.unwrap(),
            Err(MoveRejected::NotStarted)
        );
    }

    #[actix_rt::test]
    async fn random_opponent_answers_a_move() {
        let addr = controller();
        addr.send(start(GameMode::Ai, Color::White, Some("pathetic"))).await.unwrap();

        // Not our turn yet is refused, ours is accepted
        addr.send(SubmitMove(MoveRequest::new([6, 4], [4, 4]))).await.unwrap().unwrap();
        assert_eq!(
            addr.send(ClickSquare { row: 6, col: 3 }).await.unwrap(),
            ClickOutcome::Ignored
        );
        assert!(addr.send(GetSnapshot).await.unwrap().ai_thinking);

        // Random mode thinks for at most 2.2 seconds
        let mut answered = false;
        for _ in 0..40 {
            actix_rt::time::sleep(Duration::from_millis(100)).await;
            let snapshot = addr.send(GetSnapshot).await.unwrap();
            if snapshot.history.len() == 2 {
                assert_eq!(snapshot.turn, Color::White);
                assert!(!snapshot.ai_thinking);
                answered = true;
                break;
            }
        }
        assert!(answered, "the random opponent never moved");
    }

    #[actix_rt::test]
    async fn restart_drops_the_pending_think() {
        let addr = controller();
        addr.send(start(GameMode::Ai, Color::White, Some("pathetic"))).await.unwrap();
        addr.send(SubmitMove(MoveRequest::new([6, 4], [4, 4]))).await.unwrap().unwrap();

        // A fresh game before the think fires
        addr.send(start(GameMode::Local, Color::White, None)).await.unwrap();
        actix_rt::time::sleep(Duration::from_millis(2400)).await;
        let snapshot = addr.send(GetSnapshot).await.unwrap();
        assert!(snapshot.history.is_empty());
        assert_eq!(snapshot.mode, Some(GameMode::Local));
    }

    #[actix_rt::test]
    async fn resign_in_ai_mode_names_the_player() {
        let addr = controller();
        addr.send(start(GameMode::Ai, Color::White, Some("pathetic"))).await.unwrap();
        addr.send(Resign).await.unwrap();
        let snapshot = addr.send(GetSnapshot).await.unwrap();
        assert_eq!(snapshot.status, GameStatus::Resigned);
        assert_eq!(snapshot.winner, Some(Color::Black));
        assert_eq!(snapshot.status_line, "White resigned. Black wins!");

        addr.send(LeaveGame).await.unwrap();
        assert_eq!(addr.send(GetSnapshot).await.unwrap().status, GameStatus::Idle);
    }
}
