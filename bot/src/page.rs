//! The boundary to the live page: script evaluation, the pointer and the
//! overlay. Concrete implementations live with whoever owns the browser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PageError {
    #[error("page session unavailable: {0}")]
    Unavailable(String),
    #[error("script failed: {0}")]
    Script(String),
    #[error("unexpected reply: {0}")]
    Protocol(String),
}

/// A position in page (viewport) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn lerp(self, to: Point, t: f64) -> Point {
        Point {
            x: self.x + (to.x - self.x) * t,
            y: self.y + (to.y - self.y) * t,
        }
    }
}

/// Read-only query access to the page.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Run `script` as a function body; `args` are bound to `arguments`.
    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, PageError>;
}

/// Simulated pointer input. Implementations keep the button state between
/// calls, so a drag is `move_to`, `press`, any number of `move_to`, `release`.
#[async_trait]
pub trait PointerDevice: Send {
    async fn move_to(&mut self, to: Point) -> Result<(), PageError>;
    async fn press(&mut self) -> Result<(), PageError>;
    async fn release(&mut self) -> Result<(), PageError>;

    async fn click(&mut self, at: Point) -> Result<(), PageError> {
        self.move_to(at).await?;
        self.press().await?;
        self.release().await
    }

    async fn pause(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Transient annotations drawn over the board.
#[async_trait]
pub trait Overlay: Send + Sync {
    /// Draw an arrow for a recommended move; `eval` is shown beside it.
    async fn show_arrow(&self, from: Point, to: Point, eval: Option<&str>) -> Result<(), PageError>;
    async fn clear(&self) -> Result<(), PageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp_endpoints() {
        let a = Point::new(10.0, 20.0);
        let b = Point::new(30.0, -20.0);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert_eq!(a.lerp(b, 0.5), Point::new(20.0, 0.0));
    }
}
