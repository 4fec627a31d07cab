//! Scripted engine for tests of code that drives an [`EngineManager`](crate::EngineManager).

use crate::{
    EngineBackend, EngineCommand, EngineConfig, EngineError, EngineEvent, EngineInfo,
    EngineLauncher, Score,
};
use async_trait::async_trait;
use chess::{convert_uci_castling_to_cozy, parse_uci_move};
use cozy_chess::{Board, Move};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// How the fake engine answers one `go`.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Emit the info lines, then `bestmove`.
    Answer {
        infos: Vec<EngineInfo>,
        best: String,
    },
    /// Ignore `go`; answer `stop` with a best move.
    Stall,
    /// Ignore everything.
    Freeze,
    /// Close the output stream.
    Crash,
}

impl Scripted {
    pub fn best(uci: &str) -> Self {
        Self::Answer {
            infos: Vec::new(),
            best: uci.to_string(),
        }
    }

    pub fn scored(uci: &str, cp: i32, pv: &[&str]) -> Self {
        Self::Answer {
            infos: vec![EngineInfo {
                depth: Some(10),
                score: Some(Score::Centipawns(cp)),
                pv: pv.iter().filter_map(|m| parse_uci_move(m)).collect(),
                ..Default::default()
            }],
            best: uci.to_string(),
        }
    }
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Scripted>>,
    commands: Mutex<Vec<EngineCommand>>,
    launches: AtomicU32,
    failing_launches: AtomicU32,
}

/// Launcher whose engines follow a shared script. Once the script runs out,
/// every search answers with the first legal move.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    shared: Arc<Shared>,
}

impl ScriptedLauncher {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        let launcher = Self::default();
        for step in script {
            launcher.push(step);
        }
        launcher
    }

    pub fn push(&self, step: Scripted) {
        if let Ok(mut script) = self.shared.script.lock() {
            script.push_back(step);
        }
    }

    pub fn launches(&self) -> u32 {
        self.shared.launches.load(Ordering::SeqCst)
    }

    /// Every command sent to any engine launched so far.
    pub fn commands(&self) -> Vec<EngineCommand> {
        self.shared
            .commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn fail_next_launches(&self, count: u32) {
        self.shared.failing_launches.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl EngineLauncher for ScriptedLauncher {
    async fn launch(&self, _config: &EngineConfig) -> Result<Box<dyn EngineBackend>, EngineError> {
        let failing = self.shared.failing_launches.load(Ordering::SeqCst);
        if failing > 0 {
            self.shared.failing_launches.store(failing - 1, Ordering::SeqCst);
            return Err(EngineError::Spawn("scripted launch failure".to_string()));
        }
        self.shared.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            shared: self.shared.clone(),
            pending: VecDeque::new(),
            stalled: false,
            dead: false,
            board: Board::default(),
        }))
    }
}

struct ScriptedEngine {
    shared: Arc<Shared>,
    pending: VecDeque<EngineEvent>,
    stalled: bool,
    dead: bool,
    board: Board,
}

impl ScriptedEngine {
    fn first_legal(&self) -> Option<Move> {
        let mut first = None;
        self.board.generate_moves(|mvs| {
            first = mvs.into_iter().next();
            true
        });
        // Castling comes out as king-takes-rook; answer the way UCI would
        first.map(|mv| chess::convert_cozy_castling_to_uci(&self.board, mv))
    }

    fn set_position(&mut self, fen: &str, moves: &[String]) {
        let mut board = Board::from_fen(fen, false).unwrap_or_default();
        for text in moves {
            let Some(mv) = parse_uci_move(text) else {
                break;
            };
            let mut legal = Vec::new();
            board.generate_moves(|mvs| {
                legal.extend(mvs);
                false
            });
            if board.try_play(convert_uci_castling_to_cozy(mv, &legal)).is_err() {
                break;
            }
        }
        self.board = board;
    }
}

#[async_trait]
impl EngineBackend for ScriptedEngine {
    async fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineError> {
        if let Ok(mut commands) = self.shared.commands.lock() {
            commands.push(cmd.clone());
        }
        if self.dead {
            return Err(EngineError::Crashed("scripted engine is dead".to_string()));
        }
        match cmd {
            EngineCommand::SetPosition { fen, moves } => self.set_position(&fen, &moves),
            EngineCommand::Go(_) => {
                let step = self.shared.script.lock().ok().and_then(|mut s| s.pop_front());
                match step {
                    Some(Scripted::Answer { infos, best }) => {
                        self.pending.extend(infos.into_iter().map(EngineEvent::Info));
                        self.pending.push_back(EngineEvent::BestMove {
                            mv: parse_uci_move(&best),
                            ponder: None,
                        });
                    }
                    Some(Scripted::Stall) => self.stalled = true,
                    Some(Scripted::Freeze) => {}
                    Some(Scripted::Crash) => {
                        self.dead = true;
                        self.pending.push_back(EngineEvent::Terminated);
                    }
                    None => {
                        let mv = self.first_legal();
                        self.pending.push_back(EngineEvent::BestMove { mv, ponder: None });
                    }
                }
            }
            EngineCommand::Stop if self.stalled => {
                self.stalled = false;
                let mv = self.first_legal();
                self.pending.push_back(EngineEvent::BestMove { mv, ponder: None });
            }
            EngineCommand::IsReady => self.pending.push_back(EngineEvent::Ready),
            _ => {}
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<EngineEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.dead {
            return None;
        }
        std::future::pending().await
    }

    async fn shutdown(self: Box<Self>) {}
}
