//! chess.com board reader.

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
const board = document.querySelector('#board-play-computer, #board-single, #board-puzzle, wc-chess-board');
if (!board) return { board: false };
const r = board.getBoundingClientRect();
const coords = Array.from(board.querySelectorAll('svg.coordinates text, svg.coordinates *')).map(t => ({
    text: (t.textContent || '').trim(),
    x: parseFloat(t.getAttribute('x')),
    y: parseFloat(t.getAttribute('y')),
})).filter(c => c.text && !isNaN(c.x) && !isNaN(c.y));
const list = document.querySelector('.play-controller-scrollable, .mode-swap-move-list-wrapper-component, wc-simple-move-list');
const moves = list ? Array.from(list.querySelectorAll('div.node[data-node]')).map(n => {
    const fig = n.querySelector('[data-figurine]');
    return { class: n.className || '', text: n.textContent.trim(), figurine: fig ? fig.getAttribute('data-figurine') : null };
}) : null;
const modal = document.querySelector('.board-modal-container, .game-over-modal-content');
const clock = document.querySelector('.clock-bottom .clock-time-monospace');
let fen = null;
try { if (board.game && typeof board.game.getFEN === 'function') fen = board.game.getFEN(); } catch (e) {}
return {
    board: true,
    url: location.href,
    puzzle: location.pathname.includes('/puzzle') || !!document.querySelector('#board-puzzle'),
    rect: { x: r.left, y: r.top, width: r.width, height: r.height },
    coords,
    moves,
    gameOver: !!modal,
    banner: modal ? modal.textContent.trim().slice(0, 200) : null,
    clock: clock ? clock.textContent.trim() : null,
    fen,
};
"#;

const INJECT: &str = r#"
const [uci] = arguments;
const board = document.querySelector('wc-chess-board, #board-play-computer, #board-single, #board-puzzle');
const game = (board && board.game) || (window.chessboard && window.chessboard.game);
if (!game || typeof game.move !== 'function') return false;
try {
    game.move({ from: uci.slice(0, 2), to: uci.slice(2, 4), promotion: uci.length > 4 ? uci[4] : undefined, userGenerated: true, animate: false });
    return true;
} catch (e) {
    return false;
}
"#;

const NEXT_PUZZLE_SELECTORS: &[&str] = &[
    "button.puzzle-buttons-playagain",
    "button.next-puzzles-start-button",
    "button[data-cy='next-puzzle']",
    "[class*='next'][class*='puzzle']",
];
const NEXT_PUZZLE_LABELS: &[&str] = &["Next"];
const NEW_GAME_SELECTORS: &[&str] = &[
    "button[data-cy='new-game-button']",
    "button.board-modal-container-buttons-button",
    "[class*='play-again']",
    "[class*='new-game']",
];
const NEW_GAME_LABELS: &[&str] = &["New Game", "Play Again", "Rematch"];

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
    coords: Vec<CoordLabel>,
    #[serde(default)]
    moves: Option<Vec<MoveNode>>,
    #[serde(default)]
    game_over: bool,
    #[serde(default)]
    banner: Option<String>,
    #[serde(default)]
    clock: Option<String>,
    #[serde(default)]
    fen: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoordLabel {
    text: String,
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize)]
struct MoveNode {
    class: String,
    text: String,
    figurine: Option<String>,
}

pub struct ChessComGrabber {
    page: Arc<dyn PageSession>,
    core: GrabberCore,
}

impl ChessComGrabber {
    pub fn new(page: Arc<dyn PageSession>) -> Self {
        Self {
            page,
            core: GrabberCore::new(Site::ChessCom),
        }
    }
}

#[async_trait]
impl BoardGrabber for ChessComGrabber {
    fn site(&self) -> Site {
        Site::ChessCom
    }

    async fn poll(&mut self) -> Result<BoardSnapshot, GrabberError> {
        let probe: Probe = run_probe(self.page.as_ref(), PROBE).await?;
        let read = interpret(probe)?;
        self.core.assemble(read)
    }

    async fn inject_move(&mut self, uci: &str, ply: u32) -> Result<bool, GrabberError> {
        tracing::debug!(uci, ply, cached_ply = self.core.cached_ply(), "Injecting move");
        let reply = self.page.execute(INJECT, vec![json!(uci)]).await?;
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

    let sans = probe.moves.map(|nodes| {
        nodes
            .iter()
            .filter(|n| n.class.contains("white-move") || n.class.contains("black-move"))
            .map(normalize_move)
            .filter(|s| !s.is_empty())
            .collect()
    });

    Ok(PageRead {
        orientation: orientation(&probe.coords),
        sans,
        fen: probe.fen,
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

/// Move nodes render the piece as a figurine attribute beside the text.
fn normalize_move(node: &MoveNode) -> String {
    let text = node.text.trim();
    match node.figurine.as_deref() {
        None => text.to_string(),
        Some(figure) if text.contains('=') => {
            // Promotion: "e8=" + "Q", check markers go last
            let mut san: String = text.chars().filter(|c| !matches!(c, '+' | '#')).collect();
            san.push_str(figure);
            if text.contains('#') {
                san.push('#');
            } else if text.contains('+') {
                san.push('+');
            }
            san
        }
        Some(figure) => format!("{}{}", figure, text),
    }
}

/// The label drawn in the bottom-left corner is "1" when White is at the bottom.
fn orientation(labels: &[CoordLabel]) -> Option<PieceColor> {
    const EPSILON: f64 = 0.5;
    let min_x = labels.iter().map(|l| l.x).fold(f64::INFINITY, f64::min);
    let corner = labels
        .iter()
        .filter(|l| l.x <= min_x + EPSILON)
        .max_by(|a, b| a.y.total_cmp(&b.y))?;
    match corner.text.as_str() {
        "1" | "a" => Some(PieceColor::White),
        "8" | "h" => Some(PieceColor::Black),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::GameOverReason;
    use crate::testing::ScriptedPage;
    use serde_json::Value;

    fn coords(bottom_left: &str, top_left: &str) -> Value {
        json!([
            { "text": top_left, "x": 0.75, "y": 3.5 },
            { "text": bottom_left, "x": 0.75, "y": 90.75 },
            { "text": "a", "x": 10.0, "y": 99.0 },
        ])
    }

    fn probe(moves: Value) -> Value {
        json!({
            "board": true,
            "url": "https://www.chess.com/game/live/1",
            "puzzle": false,
            "rect": { "x": 100.0, "y": 50.0, "width": 800.0, "height": 800.0 },
            "coords": coords("1", "8"),
            "moves": moves,
            "gameOver": false,
            "banner": null,
            "clock": "2:31",
            "fen": null,
        })
    }

    fn node(text: &str, figurine: Option<&str>, white: bool) -> Value {
        json!({
            "class": if white { "node white-move main-line-ply" } else { "node black-move main-line-ply" },
            "text": text,
            "figurine": figurine,
        })
    }

    #[test]
    fn test_normalize_figurines() {
        let mk = |text: &str, figurine: Option<&str>| MoveNode {
            class: "node white-move".to_string(),
            text: text.to_string(),
            figurine: figurine.map(str::to_string),
        };
        assert_eq!(normalize_move(&mk("e4", None)), "e4");
        assert_eq!(normalize_move(&mk("f3", Some("N"))), "Nf3");
        assert_eq!(normalize_move(&mk("e8=", Some("Q"))), "e8=Q");
        assert_eq!(normalize_move(&mk("exd8=+", Some("N"))), "exd8=N+");
        assert_eq!(normalize_move(&mk("b1=#", Some("Q"))), "b1=Q#");
    }

    #[test]
    fn test_orientation_from_corner_label() {
        let labels = |v: Value| -> Vec<CoordLabel> { serde_json::from_value(v).unwrap() };
        assert_eq!(orientation(&labels(coords("1", "8"))), Some(PieceColor::White));
        assert_eq!(orientation(&labels(coords("8", "1"))), Some(PieceColor::Black));
        assert_eq!(orientation(&[]), None);
    }

    #[test]
    fn test_interpret_probe() {
        let p: Probe = serde_json::from_value(probe(json!([
            node("e4", None, true),
            node("e5", None, false),
            node("f3", Some("N"), true),
            { "class": "node-spacer", "text": "2.", "figurine": null },
        ])))
        .unwrap();
        let read = interpret(p).unwrap();
        assert_eq!(read.orientation, Some(PieceColor::White));
        assert_eq!(read.sans.unwrap(), vec!["e4", "e5", "Nf3"]);
        assert_eq!(read.mode, Some(PageMode::Game));
        assert_eq!(read.clock, Some(std::time::Duration::from_secs(151)));
        assert_eq!(read.board_rect.map(|r| r.width), Some(800.0));
    }

    #[test]
    fn test_missing_board_is_not_found() {
        let p: Probe = serde_json::from_value(json!({ "board": false })).unwrap();
        assert!(matches!(interpret(p), Err(GrabberError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_poll_builds_snapshot() {
        let page = Arc::new(ScriptedPage::new(vec![probe(json!([
            node("d4", None, true),
            node("f6", Some("N"), false),
        ]))]));
        let mut grabber = ChessComGrabber::new(page.clone());
        let snap = grabber.poll().await.unwrap();
        assert_eq!(snap.site, Site::ChessCom);
        assert_eq!(snap.history, vec!["d2d4", "g8f6"]);
        assert!(snap.is_self_to_move());
        assert_eq!(page.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_game_over_modal() {
        let mut reply = probe(json!([node("e4", None, true)]));
        reply["gameOver"] = json!(true);
        reply["banner"] = json!("White Won - by resignation");
        let mut grabber = ChessComGrabber::new(Arc::new(ScriptedPage::new(vec![reply])));
        let snap = grabber.poll().await.unwrap();
        assert_eq!(snap.terminal, Some(GameOverReason::Resignation));
    }

    #[tokio::test]
    async fn test_inject_and_next_report_page_reply() {
        let page = Arc::new(ScriptedPage::new(vec![json!(true), json!(false)]));
        let mut grabber = ChessComGrabber::new(page.clone());
        assert!(grabber.inject_move("e2e4", 0).await.unwrap());
        assert!(!grabber.start_next(NextGameKind::Puzzle).await.unwrap());
        let calls = page.calls();
        assert_eq!(calls[0].1, vec![json!("e2e4")]);
        assert_eq!(calls[1].1[0], json!(NEXT_PUZZLE_SELECTORS));
    }
}
