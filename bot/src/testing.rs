//! In-memory stand-ins for the page boundary.
//!
//! [`FakeTable`] is a scripted board: tests set what the next poll returns and
//! queue the snapshots that should appear once the bot acts on the page.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::grabber::{BoardGrabber, GrabberError, NextGameKind};
use crate::page::{Overlay, PageError, PageSession, Point, PointerDevice};
use crate::snapshot::{BoardSnapshot, Site};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replies to scripts in order, repeating the last reply once exhausted.
#[derive(Default)]
pub struct ScriptedPage {
    replies: Mutex<VecDeque<Value>>,
    last: Mutex<Option<Value>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedPage {
    pub fn new(replies: Vec<Value>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    pub fn push(&self, reply: Value) {
        lock(&self.replies).push_back(reply);
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl PageSession for ScriptedPage {
    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, PageError> {
        lock(&self.calls).push((script.to_string(), args));
        let next = lock(&self.replies).pop_front();
        let mut last = lock(&self.last);
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                Ok(reply)
            }
            None => last
                .clone()
                .ok_or_else(|| PageError::Unavailable("no scripted reply".to_string())),
        }
    }
}

#[derive(Default)]
struct Table {
    current: Option<BoardSnapshot>,
    errors: VecDeque<GrabberError>,
    after_move: VecDeque<BoardSnapshot>,
    after_next: Option<BoardSnapshot>,
    inject_supported: bool,
    next_available: bool,
    injected: Vec<(String, u32)>,
    next_clicks: Vec<NextGameKind>,
    pointer: Vec<PointerEvent>,
    polls: usize,
    resets: usize,
}

impl Table {
    fn own_move(&mut self) {
        if let Some(next) = self.after_move.pop_front() {
            self.current = Some(next);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    MoveTo(Point),
    Press,
    Release,
}

/// Shared handle to a scripted board.
#[derive(Clone, Default)]
pub struct FakeTable(Arc<Mutex<Table>>);

impl FakeTable {
    pub fn new(initial: BoardSnapshot) -> Self {
        let table = Self::default();
        table.set(initial);
        {
            let mut t = lock(&table.0);
            t.inject_supported = true;
            t.next_available = true;
        }
        table
    }

    /// Replace what every following poll returns.
    pub fn set(&self, snapshot: BoardSnapshot) {
        lock(&self.0).current = Some(snapshot);
    }

    /// Make the page look empty (navigated away).
    pub fn clear(&self) {
        lock(&self.0).current = None;
    }

    pub fn fail_next(&self, error: GrabberError) {
        lock(&self.0).errors.push_back(error);
    }

    /// Queue the snapshot the page shows after the bot's next drag or injection.
    pub fn after_own_move(&self, snapshot: BoardSnapshot) {
        lock(&self.0).after_move.push_back(snapshot);
    }

    pub fn after_next_game(&self, snapshot: BoardSnapshot) {
        lock(&self.0).after_next = Some(snapshot);
    }

    pub fn set_inject_supported(&self, supported: bool) {
        lock(&self.0).inject_supported = supported;
    }

    pub fn set_next_available(&self, available: bool) {
        lock(&self.0).next_available = available;
    }

    pub fn current(&self) -> Option<BoardSnapshot> {
        lock(&self.0).current.clone()
    }

    pub fn injected(&self) -> Vec<(String, u32)> {
        lock(&self.0).injected.clone()
    }

    pub fn next_clicks(&self) -> Vec<NextGameKind> {
        lock(&self.0).next_clicks.clone()
    }

    pub fn pointer_events(&self) -> Vec<PointerEvent> {
        lock(&self.0).pointer.clone()
    }

    pub fn polls(&self) -> usize {
        lock(&self.0).polls
    }

    pub fn resets(&self) -> usize {
        lock(&self.0).resets
    }

    pub fn grabber(&self, site: Site) -> FakeGrabber {
        FakeGrabber {
            site,
            table: self.clone(),
        }
    }

    /// A pointer whose drags land on this table.
    pub fn pointer(&self) -> TablePointer {
        TablePointer {
            table: self.clone(),
            pressed: false,
            dragged: false,
        }
    }
}

pub struct FakeGrabber {
    site: Site,
    table: FakeTable,
}

#[async_trait]
impl BoardGrabber for FakeGrabber {
    fn site(&self) -> Site {
        self.site
    }

    async fn poll(&mut self) -> Result<BoardSnapshot, GrabberError> {
        let mut t = lock(&self.table.0);
        t.polls += 1;
        if let Some(err) = t.errors.pop_front() {
            return Err(err);
        }
        t.current
            .clone()
            .ok_or_else(|| GrabberError::NotFound("board".to_string()))
    }

    async fn inject_move(&mut self, uci: &str, ply: u32) -> Result<bool, GrabberError> {
        let mut t = lock(&self.table.0);
        if !t.inject_supported {
            return Ok(false);
        }
        t.injected.push((uci.to_string(), ply));
        t.own_move();
        Ok(true)
    }

    async fn start_next(&mut self, kind: NextGameKind) -> Result<bool, GrabberError> {
        let mut t = lock(&self.table.0);
        if !t.next_available {
            return Ok(false);
        }
        t.next_clicks.push(kind);
        if let Some(next) = t.after_next.take() {
            t.current = Some(next);
        }
        Ok(true)
    }

    fn reset(&mut self) {
        lock(&self.table.0).resets += 1;
    }
}

/// Records pointer input; a press, at least one move and a release land the
/// table's next queued own move. Clicks do not.
pub struct TablePointer {
    table: FakeTable,
    pressed: bool,
    dragged: bool,
}

#[async_trait]
impl PointerDevice for TablePointer {
    async fn move_to(&mut self, to: Point) -> Result<(), PageError> {
        self.dragged |= self.pressed;
        lock(&self.table.0).pointer.push(PointerEvent::MoveTo(to));
        Ok(())
    }

    async fn press(&mut self) -> Result<(), PageError> {
        self.pressed = true;
        self.dragged = false;
        lock(&self.table.0).pointer.push(PointerEvent::Press);
        Ok(())
    }

    async fn release(&mut self) -> Result<(), PageError> {
        let mut t = lock(&self.table.0);
        t.pointer.push(PointerEvent::Release);
        if self.pressed && self.dragged {
            t.own_move();
        }
        self.pressed = false;
        self.dragged = false;
        Ok(())
    }

    async fn pause(&mut self, _duration: std::time::Duration) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    Arrow {
        from: Point,
        to: Point,
        eval: Option<String>,
    },
    Clear,
}

#[derive(Clone, Default)]
pub struct RecordingOverlay(Arc<Mutex<Vec<OverlayEvent>>>);

impl RecordingOverlay {
    pub fn events(&self) -> Vec<OverlayEvent> {
        lock(&self.0).clone()
    }
}

#[async_trait]
impl Overlay for RecordingOverlay {
    async fn show_arrow(&self, from: Point, to: Point, eval: Option<&str>) -> Result<(), PageError> {
        lock(&self.0).push(OverlayEvent::Arrow {
            from,
            to,
            eval: eval.map(str::to_string),
        });
        Ok(())
    }

    async fn clear(&self) -> Result<(), PageError> {
        lock(&self.0).push(OverlayEvent::Clear);
        Ok(())
    }
}
