use crate::uci::{parse_uci_message, UciMessage};
use crate::{EngineBackend, EngineCommand, EngineConfig, EngineError, EngineEvent, EngineLauncher};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;

pub struct StockfishEngine {
    process: Child,
    command_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl StockfishEngine {
    /// Spawn the engine at `path` and complete the UCI handshake.
    #[tracing::instrument(level = "info", skip(config))]
    pub async fn spawn(
        path: &Path,
        config: &EngineConfig,
        handshake_timeout: Duration,
    ) -> Result<Self, EngineError> {
        tracing::info!(?config, "Starting engine");

        let mut process = tokio::process::Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!("Failed to spawn engine: {}", e);
                EngineError::Spawn(format!("{}: {}", path.display(), e))
            })?;

        let mut stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Spawn("failed to get stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EngineError::Spawn("failed to get stdout".to_string()))?;

        write_line(&mut stdin, "uci").await?;

        let (command_tx, mut command_rx) = mpsc::channel::<EngineCommand>(32);
        let (event_tx, mut event_rx) = mpsc::channel::<EngineEvent>(64);

        // Output reader task
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        tracing::warn!("Engine stdout EOF - engine closed");
                        let _ = event_tx.send(EngineEvent::Terminated).await;
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        tracing::trace!("UCI << {}", trimmed);

                        let event = match parse_uci_message(trimmed) {
                            Ok(UciMessage::UciOk) | Ok(UciMessage::ReadyOk) => EngineEvent::Ready,
                            Ok(UciMessage::BestMove { mv, ponder }) => {
                                tracing::debug!(?mv, "Received bestmove");
                                EngineEvent::BestMove { mv, ponder }
                            }
                            Ok(UciMessage::Info(info)) => EngineEvent::Info(info),
                            Ok(msg) => {
                                tracing::trace!("Ignoring UCI message: {:?}", msg);
                                continue;
                            }
                            Err(e) => {
                                tracing::trace!("Unparsed engine output: {}", e);
                                continue;
                            }
                        };

                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error reading from engine stdout: {}", e);
                        let _ = event_tx.send(EngineEvent::Terminated).await;
                        break;
                    }
                }
            }
            tracing::debug!("Output reader task exiting");
        });

        // A binary that never answers `uciok` is not a usable engine
        let handshake = tokio::time::timeout(handshake_timeout, async {
            while let Some(event) = event_rx.recv().await {
                match event {
                    EngineEvent::Ready => return Ok(()),
                    EngineEvent::Terminated => break,
                    _ => {}
                }
            }
            Err(EngineError::Spawn("engine exited during handshake".to_string()))
        })
        .await;

        match handshake {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::error!("Timeout waiting for uciok");
                return Err(EngineError::Spawn(format!(
                    "{} did not answer uciok within {:?}",
                    path.display(),
                    handshake_timeout
                )));
            }
        }

        for (name, value) in config.startup_options() {
            tracing::info!("Setting {} to {}", name, value);
            write_line(&mut stdin, &format!("setoption name {} value {}", name, value)).await?;
        }

        // Stdin writer and command processor
        tokio::spawn(async move {
            while let Some(cmd) = command_rx.recv().await {
                let quit = matches!(cmd, EngineCommand::Quit);
                let line = render_command(&cmd);
                tracing::trace!("UCI >> {}", line);
                if let Err(e) = write_line(&mut stdin, &line).await {
                    tracing::error!("Failed to write to engine: {}", e);
                    break;
                }
                if quit {
                    break;
                }
            }
            tracing::debug!("Command processor task exiting");
        });

        let engine = Self {
            process,
            command_tx,
            event_rx,
        };
        engine
            .command_tx
            .send(EngineCommand::IsReady)
            .await
            .map_err(|_| EngineError::NotRunning)?;

        tracing::info!("Engine spawned and initialized successfully");
        Ok(engine)
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<(), EngineError> {
    stdin
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .map_err(|e| EngineError::Crashed(format!("failed to write to engine: {}", e)))?;
    stdin
        .flush()
        .await
        .map_err(|e| EngineError::Crashed(format!("failed to flush engine stdin: {}", e)))
}

/// Render a command as one UCI protocol line.
fn render_command(cmd: &EngineCommand) -> String {
    match cmd {
        EngineCommand::SetPosition { fen, moves } => {
            let mut position_cmd = format!("position fen {}", fen);
            if !moves.is_empty() {
                position_cmd.push_str(" moves ");
                position_cmd.push_str(&moves.join(" "));
            }
            position_cmd
        }
        EngineCommand::SetOption { name, value } => match value {
            Some(val) => format!("setoption name {} value {}", name, val),
            None => format!("setoption name {}", name),
        },
        EngineCommand::Go(params) => {
            let mut go_cmd = "go".to_string();
            if let Some(depth) = params.depth {
                go_cmd.push_str(&format!(" depth {}", depth));
            }
            if let Some(movetime) = params.movetime {
                go_cmd.push_str(&format!(" movetime {}", movetime));
            }
            if params.infinite {
                go_cmd.push_str(" infinite");
            }
            if params.depth.is_none() && params.movetime.is_none() && !params.infinite {
                go_cmd.push_str(" movetime 1000"); // Default 1 second
            }
            go_cmd
        }
        EngineCommand::IsReady => "isready".to_string(),
        EngineCommand::Stop => "stop".to_string(),
        EngineCommand::Quit => "quit".to_string(),
    }
}

#[async_trait]
impl EngineBackend for StockfishEngine {
    async fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineError> {
        tracing::debug!("Queueing command: {:?}", cmd);
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::Crashed("engine command channel closed".to_string()))
    }

    async fn recv(&mut self) -> Option<EngineEvent> {
        self.event_rx.recv().await
    }

    async fn shutdown(mut self: Box<Self>) {
        let _ = self.command_tx.send(EngineCommand::Quit).await;
        let _ = tokio::time::timeout(Duration::from_secs(1), self.process.wait()).await;
        let _ = self.process.kill().await;
    }
}

/// Launches Stockfish from an explicit path or a well-known location.
#[derive(Debug, Clone)]
pub struct StockfishLauncher {
    pub path: Option<PathBuf>,
    pub handshake_timeout: Duration,
}

impl Default for StockfishLauncher {
    fn default() -> Self {
        Self {
            path: None,
            handshake_timeout: Duration::from_secs(3),
        }
    }
}

impl StockfishLauncher {
    pub fn resolve_path(&self) -> Result<PathBuf, EngineError> {
        match &self.path {
            Some(path) if path.exists() => Ok(path.clone()),
            Some(path) => Err(EngineError::Spawn(format!(
                "engine binary {} does not exist",
                path.display()
            ))),
            None => find_stockfish_path()
                .ok_or_else(|| EngineError::Spawn("Stockfish not found".to_string())),
        }
    }
}

#[async_trait]
impl EngineLauncher for StockfishLauncher {
    async fn launch(&self, config: &EngineConfig) -> Result<Box<dyn EngineBackend>, EngineError> {
        let path = self.resolve_path()?;
        let engine = StockfishEngine::spawn(&path, config, self.handshake_timeout).await?;
        Ok(Box::new(engine))
    }
}

/// Find Stockfish executable in common locations
pub fn find_stockfish_path() -> Option<PathBuf> {
    let paths = [
        "/usr/local/bin/stockfish",
        "/usr/bin/stockfish",
        "/opt/homebrew/bin/stockfish",
        "/usr/games/stockfish",
    ];

    if let Some(found) = paths.iter().map(Path::new).find(|p| p.exists()) {
        return Some(found.to_path_buf());
    }

    // In PATH
    std::env::var_os("PATH").and_then(|path| {
        std::env::split_paths(&path)
            .map(|dir| dir.join("stockfish"))
            .find(|candidate| candidate.is_file())
    })
}
