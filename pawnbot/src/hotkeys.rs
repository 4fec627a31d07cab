//! Operator keys: `1` start, `2` stop, `3` confirm the shown move, `q` quit.

use bot::{BotHandle, OperatorSignal};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use futures::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hotkey {
    Signal(OperatorSignal),
    Quit,
}

/// Keys act on press only, so holding one down sends a single signal.
pub fn map_key(key: KeyEvent) -> Option<Hotkey> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('1') => Some(Hotkey::Signal(OperatorSignal::Start)),
        KeyCode::Char('2') => Some(Hotkey::Signal(OperatorSignal::Stop)),
        KeyCode::Char('3') => Some(Hotkey::Signal(OperatorSignal::ConfirmManualMove)),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Hotkey::Quit),
        KeyCode::Char('q') | KeyCode::Esc => Some(Hotkey::Quit),
        _ => None,
    }
}

/// Raw mode for the lifetime of the guard.
struct RawMode;

impl RawMode {
    fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Read keys until the operator quits or the terminal closes.
pub async fn run(handle: &BotHandle) -> anyhow::Result<()> {
    let _raw = RawMode::enable()?;
    let mut events = EventStream::new();

    while let Some(event) = events.next().await {
        let key = match event {
            Ok(Event::Key(key)) => key,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Terminal event error: {}", e);
                continue;
            }
        };
        match map_key(key) {
            Some(Hotkey::Signal(signal)) => {
                tracing::debug!(?signal, "Hotkey");
                let lifecycle = handle.signal(signal).await?;
                tracing::debug!(?lifecycle, "Signal handled");
            }
            Some(Hotkey::Quit) => break,
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn key(code: KeyCode, kind: KeyEventKind) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind,
            state: KeyEventState::empty(),
        }
    }

    #[test]
    fn test_number_keys_map_to_signals() {
        assert_eq!(
            map_key(key(KeyCode::Char('1'), KeyEventKind::Press)),
            Some(Hotkey::Signal(OperatorSignal::Start))
        );
        assert_eq!(
            map_key(key(KeyCode::Char('2'), KeyEventKind::Press)),
            Some(Hotkey::Signal(OperatorSignal::Stop))
        );
        assert_eq!(
            map_key(key(KeyCode::Char('3'), KeyEventKind::Press)),
            Some(Hotkey::Signal(OperatorSignal::ConfirmManualMove))
        );
        assert_eq!(map_key(key(KeyCode::Char('q'), KeyEventKind::Press)), Some(Hotkey::Quit));
    }

    #[test]
    fn test_repeats_and_releases_are_ignored() {
        assert_eq!(map_key(key(KeyCode::Char('1'), KeyEventKind::Repeat)), None);
        assert_eq!(map_key(key(KeyCode::Char('1'), KeyEventKind::Release)), None);
        assert_eq!(map_key(key(KeyCode::Char('x'), KeyEventKind::Press)), None);
    }

    #[test]
    fn test_ctrl_c_quits() {
        let ctrl_c = KeyEvent {
            modifiers: KeyModifiers::CONTROL,
            ..key(KeyCode::Char('c'), KeyEventKind::Press)
        };
        assert_eq!(map_key(ctrl_c), Some(Hotkey::Quit));
    }
}
