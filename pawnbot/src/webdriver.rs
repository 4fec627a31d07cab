//! Page access over the W3C WebDriver protocol.
//!
//! pawnbot does not start a browser. It attaches to a session the operator
//! already opened (driver endpoint plus session id) and uses it for script
//! evaluation, pointer actions and the overlay.

use async_trait::async_trait;
use bot::{Overlay, PageError, PageSession, Point, PointerDevice};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Id the overlay's element carries in the page.
const OVERLAY_ID: &str = "pawnbot-overlay";

const SHOW_ARROW: &str = r#"
const [id, x1, y1, x2, y2, label] = arguments;
let root = document.getElementById(id);
if (!root) {
    root = document.createElementNS('http://www.w3.org/2000/svg', 'svg');
    root.id = id;
    root.style.cssText = 'position:fixed;left:0;top:0;width:100vw;height:100vh;pointer-events:none;z-index:2147483647';
    document.body.appendChild(root);
}
root.innerHTML =
    '<defs><marker id="' + id + '-head" markerWidth="4" markerHeight="4" refX="2" refY="2" orient="auto">' +
    '<path d="M0,0 L4,2 L0,4 z" fill="rgba(21,120,27,0.8)"/></marker></defs>' +
    '<line x1="' + x1 + '" y1="' + y1 + '" x2="' + x2 + '" y2="' + y2 + '" stroke="rgba(21,120,27,0.8)"' +
    ' stroke-width="10" stroke-linecap="round" marker-end="url(#' + id + '-head)"/>';
if (label) {
    const text = document.createElementNS('http://www.w3.org/2000/svg', 'text');
    text.setAttribute('x', x2 + 12);
    text.setAttribute('y', y2 - 12);
    text.setAttribute('font-size', '18');
    text.setAttribute('font-family', 'sans-serif');
    text.setAttribute('fill', '#15781b');
    text.textContent = label;
    root.appendChild(text);
}
return true;
"#;

const CLEAR: &str = r#"
const root = document.getElementById(arguments[0]);
if (root) root.remove();
return true;
"#;

#[derive(Deserialize)]
struct Reply {
    value: Value,
}

#[derive(Deserialize)]
struct ErrorValue {
    error: String,
    #[serde(default)]
    message: String,
}

/// A handle on one existing WebDriver session.
#[derive(Clone)]
pub struct WebDriverClient {
    http: reqwest::Client,
    session_url: String,
}

impl WebDriverClient {
    /// `endpoint` is the driver's base URL, e.g. `http://localhost:9515`.
    pub fn attach(endpoint: &str, session_id: &str) -> Result<Self, PageError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PageError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            session_url: format!("{}/session/{}", endpoint.trim_end_matches('/'), session_id),
        })
    }

    /// URL of the page the session shows. Also proves the session is alive.
    pub async fn current_url(&self) -> Result<String, PageError> {
        let response = self
            .http
            .get(format!("{}/url", self.session_url))
            .send()
            .await
            .map_err(|e| PageError::Unavailable(e.to_string()))?;
        let value = read_reply(response).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PageError::Protocol(format!("url is not a string: {}", value)))
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, PageError> {
        let response = self
            .http
            .post(format!("{}/{}", self.session_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| PageError::Unavailable(e.to_string()))?;
        read_reply(response).await
    }

    async fn perform(&self, action: Value) -> Result<(), PageError> {
        self.post("actions", pointer_actions(vec![action])).await?;
        Ok(())
    }
}

async fn read_reply(response: reqwest::Response) -> Result<Value, PageError> {
    let status = response.status();
    let reply: Reply = response
        .json()
        .await
        .map_err(|e| PageError::Protocol(e.to_string()))?;
    if status.is_success() {
        Ok(reply.value)
    } else {
        Err(classify_error(reply.value))
    }
}

/// Map a WebDriver error value onto the page error taxonomy.
fn classify_error(value: Value) -> PageError {
    let Ok(error) = serde_json::from_value::<ErrorValue>(value.clone()) else {
        return PageError::Protocol(value.to_string());
    };
    let text = format!("{}: {}", error.error, error.message);
    match error.error.as_str() {
        "javascript error" | "script timeout" => PageError::Script(text),
        "invalid session id" | "no such window" | "session not created" => {
            PageError::Unavailable(text)
        }
        _ => PageError::Protocol(text),
    }
}

/// One pointer source named `mouse` performing `actions` in order.
fn pointer_actions(actions: Vec<Value>) -> Value {
    json!({
        "actions": [{
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": actions,
        }]
    })
}

fn pointer_move(to: Point) -> Value {
    json!({
        "type": "pointerMove",
        "duration": 0,
        "origin": "viewport",
        "x": to.x.round() as i64,
        "y": to.y.round() as i64,
    })
}

#[async_trait]
impl PageSession for WebDriverClient {
    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, PageError> {
        self.post("execute/sync", json!({ "script": script, "args": args }))
            .await
    }
}

/// The session's mouse. WebDriver keeps button state between action calls.
pub struct WebDriverPointer {
    client: WebDriverClient,
}

impl WebDriverPointer {
    pub fn new(client: WebDriverClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PointerDevice for WebDriverPointer {
    async fn move_to(&mut self, to: Point) -> Result<(), PageError> {
        self.client.perform(pointer_move(to)).await
    }

    async fn press(&mut self) -> Result<(), PageError> {
        self.client
            .perform(json!({ "type": "pointerDown", "button": 0 }))
            .await
    }

    async fn release(&mut self) -> Result<(), PageError> {
        self.client
            .perform(json!({ "type": "pointerUp", "button": 0 }))
            .await
    }

    async fn click(&mut self, at: Point) -> Result<(), PageError> {
        let actions = vec![
            pointer_move(at),
            json!({ "type": "pointerDown", "button": 0 }),
            json!({ "type": "pointerUp", "button": 0 }),
        ];
        self.client.post("actions", pointer_actions(actions)).await?;
        Ok(())
    }
}

/// Arrow overlay drawn as a fixed SVG layer over the page.
pub struct PageOverlay {
    client: WebDriverClient,
}

impl PageOverlay {
    pub fn new(client: WebDriverClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Overlay for PageOverlay {
    async fn show_arrow(&self, from: Point, to: Point, eval: Option<&str>) -> Result<(), PageError> {
        let args = vec![
            json!(OVERLAY_ID),
            json!(from.x),
            json!(from.y),
            json!(to.x),
            json!(to.y),
            json!(eval.unwrap_or("")),
        ];
        self.client.execute(SHOW_ARROW, args).await.map(|_| ())
    }

    async fn clear(&self) -> Result<(), PageError> {
        self.client
            .execute(CLEAR, vec![json!(OVERLAY_ID)])
            .await
            .map(|_| ())
    }
}
