//! lichess.org board reader.

use async_trait::async_trait;
use chess::PieceColor;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{
    click_first, parse_clock, run_probe, BoardGrabber, GrabberCore, GrabberError, NextGameKind,
    PageRead, RawRect,
};
use crate::page::PageSession;
use crate::snapshot::{BoardSnapshot, PageMode, Site};

const PROBE: &str = r#"
const container = document.querySelector('cg-container');
if (!container) return { board: false };
const wrap = container.closest('.cg-wrap') || document.querySelector('.cg-wrap');
const r = (container.querySelector('cg-board') || container).getBoundingClientRect();
const puzzle = location.pathname.startsWith('/training') || !!document.querySelector('main.puzzle');
let moves = null;
if (puzzle) {
    const list = document.querySelector('.puzzle__moves .tview2, .tview2');
    moves = list ? Array.from(list.querySelectorAll('move')).map(m => m.textContent) : null;
} else {
    const list = document.querySelector('rm6');
    moves = list ? Array.from(list.querySelectorAll('kwdb, move')).map(m => m.textContent) : null;
}
const over = puzzle
    ? document.querySelector('.puzzle__feedback.after, .puzzle__tools .complete')
    : document.querySelector('.result-wrap, rm6 .result');
const clock = document.querySelector('.rclock-bottom .time');
return {
    board: true,
    url: location.href,
    puzzle,
    rect: { x: r.left, y: r.top, width: r.width, height: r.height },
    orientation: wrap ? wrap.className : null,
    ranks: Array.from(document.querySelectorAll('coords.ranks coord')).map(c => c.textContent.trim()),
    files: Array.from(document.querySelectorAll('coords.files coord')).map(c => c.textContent.trim()),
    moves,
    gameOver: !!over,
    banner: over ? over.textContent.trim().slice(0, 200) : null,
    clock: clock ? clock.textContent.trim() : null,
};
"#;

const INJECT: &str = r#"
const [uci, ply] = arguments;
try {
    if (window.lichess && lichess.pubsub) {
        lichess.pubsub.emit('socket.send', 'move', { u: uci, b: 1, a: ply });
        return true;
    }
    const board = document.querySelector('cg-board');
    if (board && board.parentNode && board.parentNode.chessground) {
        board.parentNode.chessground.move(uci.slice(0, 2), uci.slice(2, 4));
        return true;
    }
} catch (e) {}
return false;
"#;

const NEXT_PUZZLE_SELECTORS: &[&str] = &[
    ".puzzle__more a.continue",
    ".puzzle__feedback a.continue",
    ".puzzle__vote ~ a",
];
const NEXT_PUZZLE_LABELS: &[&str] = &["Continue training", "Next"];
const NEW_GAME_SELECTORS: &[&str] = &[".follow-up a.fbt.new-opponent", ".follow-up .new-opponent"];
const NEW_GAME_LABELS: &[&str] = &["New opponent"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Probe {
    board: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    puzzle: bool,
    #[serde(default)]
    rect: Option<RawRect>,
    #[serde(default)]
    orientation: Option<String>,
    #[serde(default)]
    ranks: Vec<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    moves: Option<Vec<String>>,
    #[serde(default)]
    game_over: bool,
    #[serde(default)]
    banner: Option<String>,
    #[serde(default)]
    clock: Option<String>,
}

pub struct LichessGrabber {
    page: Arc<dyn PageSession>,
    core: GrabberCore,
}

impl LichessGrabber {
    pub fn new(page: Arc<dyn PageSession>) -> Self {
        Self {
            page,
            core: GrabberCore::new(Site::Lichess),
        }
    }
}

#[async_trait]
impl BoardGrabber for LichessGrabber {
    fn site(&self) -> Site {
        Site::Lichess
    }

    async fn poll(&mut self) -> Result<BoardSnapshot, GrabberError> {
        let probe: Probe = run_probe(self.page.as_ref(), PROBE).await?;
        let read = interpret(probe)?;
        self.core.assemble(read)
    }

    async fn inject_move(&mut self, uci: &str, ply: u32) -> Result<bool, GrabberError> {
        let reply = self.page.execute(INJECT, vec![json!(uci), json!(ply)]).await?;
        Ok(reply.as_bool().unwrap_or(false))
    }

    async fn start_next(&mut self, kind: NextGameKind) -> Result<bool, GrabberError> {
        let (selectors, labels) = match kind {
            NextGameKind::Puzzle => (NEXT_PUZZLE_SELECTORS, NEXT_PUZZLE_LABELS),
            NextGameKind::Match => (NEW_GAME_SELECTORS, NEW_GAME_LABELS),
        };
        click_first(self.page.as_ref(), selectors, labels).await
    }

    fn reset(&mut self) {
        self.core.reset();
    }
}

fn interpret(probe: Probe) -> Result<PageRead, GrabberError> {
    if !probe.board {
        return Err(GrabberError::NotFound("board".to_string()));
    }

    Ok(PageRead {
        orientation: orientation(probe.orientation.as_deref(), &probe.ranks, &probe.files),
        sans: probe
            .moves
            .map(|moves| moves.iter().map(|m| sanitize(m)).filter(|m| !m.is_empty()).collect()),
        fen: None,
        mode: Some(if probe.puzzle {
            PageMode::Puzzle
        } else {
            PageMode::Game
        }),
        game_over: probe.game_over,
        banner: probe.banner,
        clock: probe.clock.as_deref().and_then(parse_clock),
        board_rect: probe.rect.and_then(RawRect::into_rect),
        url: probe.url,
    })
}

/// Drop annotation glyphs and whitespace around a move's text.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '#' | '=' | '-'))
        .collect()
}

/// Wrapper class first, then the coordinate labels. lichess always draws the
/// player's side at the bottom, and the board defaults to White.
fn orientation(class: Option<&str>, ranks: &[String], files: &[String]) -> Option<PieceColor> {
    if let Some(class) = class {
        if class.contains("orientation-white") {
            return Some(PieceColor::White);
        }
        if class.contains("orientation-black") {
            return Some(PieceColor::Black);
        }
    }
    // Labels are listed top to bottom and left to right
    match ranks.first().map(String::as_str) {
        Some("8") => return Some(PieceColor::White),
        Some("1") => return Some(PieceColor::Black),
        _ => {}
    }
    match files.first().map(String::as_str) {
        Some("h") => Some(PieceColor::Black),
        _ => Some(PieceColor::White),
    }
}
