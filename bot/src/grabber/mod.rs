//! Board state acquisition.
//!
//! Each site variant runs one probe script per poll and turns the reply into a
//! [`PageRead`]; [`GrabberCore`] turns that into a [`BoardSnapshot`] the same
//! way for every site.

pub mod chesscom;
pub mod lichess;

use async_trait::async_trait;
use chess::{parse_san, PieceColor, SanError, START_FEN};
use cozy_chess::{Board, Move};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::page::{PageError, PageSession};
use crate::snapshot::{BoardRect, BoardSnapshot, GameOverReason, PageMode, Site};

pub use chesscom::ChessComGrabber;
pub use lichess::LichessGrabber;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GrabberError {
    #[error("page element not found: {0}")]
    NotFound(String),
    #[error("unexpected page structure: {0}")]
    SchemaMismatch(String),
    #[error(transparent)]
    Page(#[from] PageError),
}

/// Which "play again" affordance to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextGameKind {
    Puzzle,
    Match,
}

#[async_trait]
pub trait BoardGrabber: Send {
    fn site(&self) -> Site;

    async fn poll(&mut self) -> Result<BoardSnapshot, GrabberError>;

    /// Apply a move through the page's own scripting. `ply` is the ply number
    /// the move will have. `Ok(false)` when the page offered no way to do it.
    async fn inject_move(&mut self, uci: &str, ply: u32) -> Result<bool, GrabberError>;

    /// Click the next-puzzle / new-game affordance. `Ok(false)` while none is shown.
    async fn start_next(&mut self, kind: NextGameKind) -> Result<bool, GrabberError>;

    /// Forget per-game caches (orientation, move list).
    fn reset(&mut self);
}

pub fn grabber_for(site: Site, page: Arc<dyn PageSession>) -> Box<dyn BoardGrabber> {
    match site {
        Site::ChessCom => Box::new(ChessComGrabber::new(page)),
        Site::Lichess => Box::new(LichessGrabber::new(page)),
    }
}

/// What a site probe found, before normalisation.
#[derive(Debug, Clone, Default)]
pub(crate) struct PageRead {
    pub orientation: Option<PieceColor>,
    /// `None` when the page has no move list element.
    pub sans: Option<Vec<String>>,
    /// Current position, when the page exposes one.
    pub fen: Option<String>,
    pub mode: Option<PageMode>,
    pub game_over: bool,
    pub banner: Option<String>,
    pub clock: Option<Duration>,
    pub board_rect: Option<BoardRect>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct RawRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RawRect {
    pub(crate) fn into_rect(self) -> Option<BoardRect> {
        (self.width > 0.0 && self.height > 0.0).then_some(BoardRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        })
    }
}

/// Replays the page's move list incrementally.
#[derive(Debug, Clone)]
struct MoveListCache {
    sans: Vec<String>,
    moves: Vec<Move>,
    board: Board,
}

impl Default for MoveListCache {
    fn default() -> Self {
        Self {
            sans: Vec::new(),
            moves: Vec::new(),
            board: Board::default(),
        }
    }
}

impl MoveListCache {
    fn is_empty(&self) -> bool {
        self.sans.is_empty()
    }

    fn update(&mut self, sans: &[String]) -> Result<(), SanError> {
        let shared = self
            .sans
            .iter()
            .zip(sans)
            .take_while(|(cached, read)| cached == read)
            .count();

        if shared < self.sans.len() {
            // The page rewrote earlier moves; replay the common prefix
            self.moves.truncate(shared);
            self.sans.truncate(shared);
            self.board = Board::default();
            for &mv in &self.moves {
                self.board.play_unchecked(mv);
            }
        }

        for san in &sans[shared..] {
            let mv = parse_san(&self.board, san)?;
            self.board.play_unchecked(mv);
            self.moves.push(mv);
            self.sans.push(san.clone());
        }
        Ok(())
    }
}

/// Site-independent half of a grabber: orientation cache, move replay and
/// snapshot assembly.
#[derive(Debug)]
pub(crate) struct GrabberCore {
    site: Site,
    player: Option<PieceColor>,
    url: Option<String>,
    moves: MoveListCache,
}

impl GrabberCore {
    pub(crate) fn new(site: Site) -> Self {
        Self {
            site,
            player: None,
            url: None,
            moves: MoveListCache::default(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.player = None;
        self.url = None;
        self.moves = MoveListCache::default();
    }

    /// Ply number the next move will have.
    pub(crate) fn cached_ply(&self) -> u32 {
        self.moves.moves.len() as u32
    }

    pub(crate) fn assemble(&mut self, read: PageRead) -> Result<BoardSnapshot, GrabberError> {
        let (sans, result_token) = match read.sans {
            Some(sans) => split_result_token(sans),
            None if read.fen.is_some() => (Vec::new(), None),
            None => return Err(GrabberError::NotFound("move list".to_string())),
        };

        let navigated = self.url.is_some() && read.url.is_some() && read.url != self.url;
        let emptied = sans.is_empty() && !self.moves.is_empty();
        if navigated || emptied {
            tracing::info!(site = %self.site, navigated, "New game detected, clearing grabber caches");
            self.reset();
        }
        if read.url.is_some() {
            self.url = read.url.clone();
        }

        let player = match self.player {
            Some(player) => player,
            None => {
                let player = read.orientation.ok_or_else(|| {
                    GrabberError::SchemaMismatch("board orientation not detectable".to_string())
                })?;
                tracing::info!(site = %self.site, %player, "Detected player color");
                self.player = Some(player);
                player
            }
        };

        let mut snapshot = match self.moves.update(&sans) {
            Ok(()) => BoardSnapshot::from_moves(
                self.site,
                player,
                START_FEN.to_string(),
                Board::default(),
                &self.moves.moves,
            ),
            Err(san_error) => match read.fen.as_deref() {
                // Puzzles list moves from a position that is not the start
                Some(fen) => {
                    BoardSnapshot::from_fen(self.site, player, fen).map_err(|e| {
                        GrabberError::SchemaMismatch(format!("page position: {}", e))
                    })?
                }
                _ => {
                    return Err(GrabberError::SchemaMismatch(format!(
                        "move list does not replay: {}",
                        san_error
                    )))
                }
            },
        };

        snapshot.mode = read.mode.unwrap_or(PageMode::Game);
        snapshot.clock = read.clock;
        snapshot.board_rect = read.board_rect;
        snapshot.url = read.url;
        if snapshot.terminal.is_none() && (read.game_over || result_token.is_some()) {
            let reason = read
                .banner
                .as_deref()
                .map(GameOverReason::from_banner)
                .unwrap_or(GameOverReason::Other);
            snapshot.terminal = Some(reason);
        }
        Ok(snapshot)
    }
}

/// Strip a trailing score token (`1-0`, `0-1`, `1/2-1/2`) from a move list.
fn split_result_token(mut sans: Vec<String>) -> (Vec<String>, Option<String>) {
    let is_result = |s: &str| {
        matches!(
            s.trim(),
            "1-0" | "0-1" | "1/2-1/2" | "½-½" | "*"
        )
    };
    match sans.last() {
        Some(last) if is_result(last) => {
            let token = sans.pop();
            (sans, token)
        }
        _ => (sans, None),
    }
}

/// Parse a clock display such as `4:59`, `0:09.8` or `1:02:03`.
pub(crate) fn parse_clock(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut seconds = 0.0f64;
    for part in text.split(':') {
        let value: f64 = part.trim().parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        seconds = seconds * 60.0 + value;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Run a probe and decode its JSON reply.
pub(crate) async fn run_probe<T: serde::de::DeserializeOwned>(
    page: &dyn PageSession,
    script: &str,
) -> Result<T, GrabberError> {
    let value = page.execute(script, Vec::new()).await?;
    serde_json::from_value(value)
        .map_err(|e| GrabberError::SchemaMismatch(format!("probe reply: {}", e)))
}

const CLICK_FIRST: &str = r#"
const [selectors, labels] = arguments;
for (const selector of selectors) {
    const el = document.querySelector(selector);
    if (el) { el.click(); return true; }
}
const candidates = Array.from(document.querySelectorAll('button, a'));
for (const label of labels) {
    const el = candidates.find(c => c.textContent.includes(label));
    if (el) { el.click(); return true; }
}
return false;
"#;

/// Click the first element matching one of `selectors`, falling back to a
/// button or link whose text contains one of `labels`.
pub(crate) async fn click_first(
    page: &dyn PageSession,
    selectors: &[&str],
    labels: &[&str],
) -> Result<bool, GrabberError> {
    let reply = page
        .execute(
            CLICK_FIRST,
            vec![serde_json::json!(selectors), serde_json::json!(labels)],
        )
        .await?;
    Ok(reply.as_bool().unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(sans: &[&str]) -> PageRead {
        PageRead {
            orientation: Some(PieceColor::White),
            sans: Some(sans.iter().map(|s| s.to_string()).collect()),
            url: Some("https://lichess.org/abc".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_assemble_replays_moves() {
        let mut core = GrabberCore::new(Site::Lichess);
        let snap = core.assemble(read(&["e4", "e5", "Nf3"])).unwrap();
        assert_eq!(snap.ply, 3);
        assert_eq!(snap.player, PieceColor::White);
        assert_eq!(snap.side_to_move, PieceColor::Black);
        assert_eq!(core.cached_ply(), 3);

        let snap = core.assemble(read(&["e4", "e5", "Nf3", "Nc6"])).unwrap();
        assert_eq!(snap.history.last().map(String::as_str), Some("b8c6"));
    }

    #[test]
    fn test_orientation_cached_until_new_game() {
        let mut core = GrabberCore::new(Site::Lichess);
        core.assemble(read(&["e4"])).unwrap();

        let mut flipped = read(&["e4", "e5"]);
        flipped.orientation = Some(PieceColor::Black);
        assert_eq!(core.assemble(flipped.clone()).unwrap().player, PieceColor::White);

        // Move list empties: new game, orientation read again
        let mut fresh = read(&[]);
        fresh.orientation = Some(PieceColor::Black);
        assert_eq!(core.assemble(fresh).unwrap().player, PieceColor::Black);
    }

    #[test]
    fn test_url_change_resets_orientation() {
        let mut core = GrabberCore::new(Site::ChessCom);
        core.assemble(read(&["d4"])).unwrap();
        let mut other = read(&["d4"]);
        other.url = Some("https://lichess.org/xyz".to_string());
        other.orientation = Some(PieceColor::Black);
        assert_eq!(core.assemble(other).unwrap().player, PieceColor::Black);
    }

    #[test]
    fn test_missing_orientation_is_schema_mismatch() {
        let mut core = GrabberCore::new(Site::Lichess);
        let mut unknown = read(&[]);
        unknown.orientation = None;
        assert!(matches!(
            core.assemble(unknown),
            Err(GrabberError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_missing_move_list_is_not_found() {
        let mut core = GrabberCore::new(Site::Lichess);
        let mut no_list = read(&[]);
        no_list.sans = None;
        assert!(matches!(core.assemble(no_list), Err(GrabberError::NotFound(_))));
    }

    #[test]
    fn test_unreplayable_list_is_schema_mismatch() {
        let mut core = GrabberCore::new(Site::Lichess);
        assert!(matches!(
            core.assemble(read(&["e4", "Ke7", "Qxf7"])),
            Err(GrabberError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_rewritten_history_is_replayed() {
        let mut core = GrabberCore::new(Site::Lichess);
        core.assemble(read(&["e4", "e5"])).unwrap();
        let snap = core.assemble(read(&["e4", "c5", "Nf3"])).unwrap();
        assert_eq!(snap.history, vec!["e2e4", "c7c5", "g1f3"]);
    }

    #[test]
    fn test_fen_fallback_for_puzzles() {
        let mut core = GrabberCore::new(Site::ChessCom);
        let mut puzzle = read(&["Qxf7+"]);
        puzzle.fen = Some("r1bqkb1r/pppp1Qpp/2n2n2/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 4".to_string());
        puzzle.mode = Some(PageMode::Puzzle);
        let snap = core.assemble(puzzle).unwrap();
        assert_eq!(snap.mode, PageMode::Puzzle);
        assert_eq!(snap.ply, 0);
        assert_eq!(snap.terminal, Some(GameOverReason::Checkmate));
    }

    #[test]
    fn test_result_token_marks_game_over() {
        let mut core = GrabberCore::new(Site::ChessCom);
        let snap = core.assemble(read(&["e4", "e5", "1-0"])).unwrap();
        assert_eq!(snap.ply, 2);
        assert_eq!(snap.terminal, Some(GameOverReason::Other));

        let mut core = GrabberCore::new(Site::ChessCom);
        let mut resigned = read(&["e4"]);
        resigned.game_over = true;
        resigned.banner = Some("Black resigned".to_string());
        assert_eq!(
            core.assemble(resigned).unwrap().terminal,
            Some(GameOverReason::Resignation)
        );
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("4:59"), Some(Duration::from_secs(299)));
        assert_eq!(parse_clock("0:09.8"), Some(Duration::from_secs_f64(9.8)));
        assert_eq!(parse_clock("1:02:03"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_clock(""), None);
    }

    #[test]
    fn test_parse_clock_rejects_unreadable_numbers() {
        assert_eq!(parse_clock("inf"), None);
        assert_eq!(parse_clock("NaN"), None);
        assert_eq!(parse_clock("-1:05"), None);
        assert_eq!(parse_clock("99999999999999999999999:00"), None);
        assert_eq!(parse_clock("--"), None);
    }
}
