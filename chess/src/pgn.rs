//! PGN export of a played line.

use std::fmt::Write;

/// Game result token used in the PGN `Result` tag and movetext terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgnResult {
    WhiteWins,
    BlackWins,
    Draw,
    Ongoing,
}

impl PgnResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WhiteWins => "1-0",
            Self::BlackWins => "0-1",
            Self::Draw => "1/2-1/2",
            Self::Ongoing => "*",
        }
    }
}

/// Render a PGN document. `start_fen` adds the `SetUp`/`FEN` tags for games
/// that did not begin from the standard position.
pub fn write_pgn(
    tags: &[(&str, String)],
    start_fen: Option<&str>,
    start_ply: u32,
    sans: &[String],
    result: PgnResult,
) -> String {
    let mut out = String::new();
    for (name, value) in tags {
        let _ = writeln!(out, "[{} \"{}\"]", name, value.replace('"', "'"));
    }
    if let Some(fen) = start_fen {
        let _ = writeln!(out, "[SetUp \"1\"]");
        let _ = writeln!(out, "[FEN \"{}\"]", fen);
    }
    let _ = writeln!(out, "[Result \"{}\"]", result.as_str());
    out.push('\n');

    let mut line = String::new();
    for (i, san) in sans.iter().enumerate() {
        let ply = start_ply + i as u32;
        if ply % 2 == 0 {
            let _ = write!(line, "{}. ", ply / 2 + 1);
        } else if i == 0 {
            let _ = write!(line, "{}... ", ply / 2 + 1);
        }
        line.push_str(san);
        line.push(' ');
    }
    line.push_str(result.as_str());
    out.push_str(&line);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movetext_numbering() {
        let sans = vec!["e4".to_string(), "e5".to_string(), "Nf3".to_string()];
        let pgn = write_pgn(&[("Site", "lichess.org".to_string())], None, 0, &sans, PgnResult::Ongoing);
        assert!(pgn.starts_with("[Site \"lichess.org\"]\n[Result \"*\"]\n\n"));
        assert!(pgn.ends_with("1. e4 e5 2. Nf3 *\n"));
    }

    #[test]
    fn test_black_to_move_start() {
        let sans = vec!["Qxf2#".to_string()];
        let pgn = write_pgn(&[], Some("fen"), 5, &sans, PgnResult::BlackWins);
        assert!(pgn.contains("[FEN \"fen\"]"));
        assert!(pgn.ends_with("3... Qxf2# 0-1\n"));
    }
}
