//! Actor that drives an external UCI engine process.

use actix::prelude::*;
use futures::channel::{mpsc, oneshot};
use futures::StreamExt;
use log::{debug, info, warn};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::engine::uci::{parse_engine_line, preset_commands, search_commands, EngineLine, SearchSlot};
use crate::error::SearchError;
use crate::models::config::AiPreset;

type SearchReply = oneshot::Sender<Result<String, SearchError>>;

/// Ask for a best move. Resolves with the engine's UCI move text.
#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<String, SearchError>")]
pub struct Search {
    pub fen: String,
    pub depth: u32,
    pub preset: &'static AiPreset,
    pub timeout: Duration,
}

/// Reset the engine for a new game
#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct NewGame;

/// Cancel any search, quit and kill the process
#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct Shutdown;

pub struct UciEngine {
    child: Child,
    input: mpsc::UnboundedSender<String>,
    ready: Option<oneshot::Sender<()>>,
    searches: SearchSlot<(SearchReply, Option<SpawnHandle>)>,
}

impl UciEngine {
    /// Spawn the engine and wait for `readyok`
    pub async fn launch(program: &str, args: &[String], ready_timeout: Duration) -> Result<Addr<UciEngine>, SearchError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SearchError::EngineUnavailable(format!("{}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SearchError::EngineUnavailable("no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SearchError::EngineUnavailable("no stdout".to_string()))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let addr = UciEngine::create(move |ctx| {
            ctx.add_stream(engine_lines(stdout));
            UciEngine {
                child,
                input: spawn_writer(stdin),
                ready: Some(ready_tx),
                searches: SearchSlot::default(),
            }
        });

        match tokio::time::timeout(ready_timeout, ready_rx).await {
            Ok(Ok(())) => {
                info!("Engine {} is ready", program);
                Ok(addr)
            }
            Ok(Err(_)) => Err(SearchError::EngineUnavailable(
                "engine exited during handshake".to_string(),
            )),
            Err(_) => {
                addr.do_send(Shutdown);
                Err(SearchError::EngineUnavailable("engine did not become ready".to_string()))
            }
        }
    }

    fn write(&self, line: impl Into<String>) {
        let line = line.into();
        debug!("engine <- {}", line);
        if self.input.unbounded_send(line).is_err() {
            warn!("Engine input is closed");
        }
    }

    fn reply(waiter: (SearchReply, Option<SpawnHandle>), result: Result<String, SearchError>, ctx: &mut Context<Self>) {
        let (tx, timer) = waiter;
        if let Some(timer) = timer {
            ctx.cancel_future(timer);
        }
        let _ = tx.send(result);
    }

    fn on_timeout(&mut self, id: u64, ctx: &mut Context<Self>) {
        if let Some(waiter) = self.searches.expire(id) {
            warn!("Search {} timed out", id);
            self.write("stop");
            UciEngine::reply(waiter, Err(SearchError::Timeout), ctx);
        }
    }
}

impl Actor for UciEngine {
    type Context = Context<Self>;

    fn started(&mut self, _: &mut Self::Context) {
        self.write("uci");
    }

    fn stopping(&mut self, ctx: &mut Self::Context) -> Running {
        if let Some(waiter) = self.searches.reset() {
            UciEngine::reply(waiter, Err(SearchError::Cancelled), ctx);
        }
        if let Err(e) = self.child.start_kill() {
            debug!("Engine already gone: {}", e);
        }
        Running::Stop
    }
}

impl StreamHandler<String> for UciEngine {
    fn handle(&mut self, line: String, ctx: &mut Context<Self>) {
        debug!("engine -> {}", line);
        match parse_engine_line(&line) {
            EngineLine::UciOk => self.write("isready"),
            EngineLine::ReadyOk => {
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(());
                }
            }
            EngineLine::BestMove(mv) => {
                if let Some(waiter) = self.searches.resolve() {
                    let result = mv.ok_or_else(|| SearchError::EngineUnavailable("no move".to_string()));
                    UciEngine::reply(waiter, result, ctx);
                }
            }
            EngineLine::Other => {}
        }
    }

    fn finished(&mut self, ctx: &mut Context<Self>) {
        warn!("Engine output closed");
        if let Some(waiter) = self.searches.reset() {
            UciEngine::reply(
                waiter,
                Err(SearchError::EngineUnavailable("engine exited".to_string())),
                ctx,
            );
        }
        ctx.stop();
    }
}

impl Handler<Search> for UciEngine {
    type Result = ResponseFuture<Result<String, SearchError>>;

    fn handle(&mut self, msg: Search, ctx: &mut Context<Self>) -> Self::Result {
        let (tx, rx) = oneshot::channel();
        let (id, superseded) = self.searches.begin((tx, None));
        if let Some(waiter) = superseded {
            self.write("stop");
            UciEngine::reply(waiter, Err(SearchError::Superseded), ctx);
        }

        for line in preset_commands(msg.preset) {
            self.write(line);
        }
        for line in search_commands(&msg.fen, msg.depth) {
            self.write(line);
        }

        let timer = ctx.run_later(msg.timeout, move |act, ctx| act.on_timeout(id, ctx));
        if let Some((_, slot)) = self.searches.pending_mut(id) {
            *slot = Some(timer);
        }

        Box::pin(async move { rx.await.unwrap_or(Err(SearchError::Cancelled)) })
    }
}

impl Handler<NewGame> for UciEngine {
    type Result = ();

    fn handle(&mut self, _: NewGame, _: &mut Context<Self>) {
        self.write("ucinewgame");
        self.write("isready");
    }
}

impl Handler<Shutdown> for UciEngine {
    type Result = ();

    fn handle(&mut self, _: Shutdown, ctx: &mut Context<Self>) {
        info!("Shutting down engine");
        if let Some(waiter) = self.searches.reset() {
            UciEngine::reply(waiter, Err(SearchError::Cancelled), ctx);
        }
        self.write("quit");
        ctx.stop();
    }
}

fn engine_lines(stdout: ChildStdout) -> impl futures::Stream<Item = String> {
    futures::stream::unfold(BufReader::new(stdout).lines(), |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((line, lines)),
            Ok(None) => None,
            Err(e) => {
                warn!("Engine read failed: {}", e);
                None
            }
        }
    })
}

fn spawn_writer(mut stdin: ChildStdin) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded::<String>();
    actix_rt::spawn(async move {
        while let Some(line) = rx.next().await {
            let framed = format!("{}\n", line);
            if let Err(e) = stdin.write_all(framed.as_bytes()).await {
                warn!("Engine write failed: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                warn!("Engine flush failed: {}", e);
                break;
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::resolve_ai_preset;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    async fn fake_engine() -> Addr<UciEngine> {
        let script = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fake_uci.sh");
        UciEngine::launch("sh", &[script.to_string()], Duration::from_secs(5))
            .await
            .expect("fake engine should start")
    }

    fn search(depth: u32, timeout: Duration) -> Search {
        Search {
            fen: START_FEN.to_string(),
            depth,
            preset: resolve_ai_preset("beginner"),
            timeout,
        }
    }

    #[actix_rt::test]
    async fn search_resolves_on_bestmove() {
        let engine = fake_engine().await;
        let best = engine.send(search(1, Duration::from_secs(5))).await.unwrap();
        assert_eq!(best, Ok("e2e4".to_string()));
        engine.send(Shutdown).await.unwrap();
    }

    #[actix_rt::test]
    async fn newer_search_supersedes_the_pending_one() {
        let engine = fake_engine().await;
        let slow = engine.send(search(8, Duration::from_secs(5)));
        let fast = engine.send(search(1, Duration::from_secs(5)));
        let (slow, fast) = futures::join!(slow, fast);
        assert_eq!(slow.unwrap(), Err(SearchError::Superseded));
        // The stopped search's bestmove must not leak into the new one
        assert_eq!(fast.unwrap(), Ok("e2e4".to_string()));
        engine.send(Shutdown).await.unwrap();
    }

    #[actix_rt::test]
    async fn slow_search_times_out() {
        let engine = fake_engine().await;
        let result = engine.send(search(8, Duration::from_millis(200))).await.unwrap();
        assert_eq!(result, Err(SearchError::Timeout));

        // The engine stays usable afterwards
        let best = engine.send(search(1, Duration::from_secs(5))).await.unwrap();
        assert_eq!(best, Ok("e2e4".to_string()));
        engine.send(Shutdown).await.unwrap();
    }

    #[actix_rt::test]
    async fn missing_engine_is_unavailable() {
        let result = UciEngine::launch("/nonexistent/engine", &[], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SearchError::EngineUnavailable(_))));
    }
}
