// =============================================================================
// webdriver.rs — THE MARIONETTE STRINGS
// =============================================================================
//
// A deliberately tiny WebDriver wire-protocol client: just enough JSON-
// over-HTTP to drive one headless browser through one government form.
// We could pull in a full browser-automation framework, but the protocol
// for our needs is nine endpoints and a polling loop, and a client we
// wrote is a client we can blame precisely when the bouncer strikes.
//
// The wire protocol, for the uninitiated:
// - POST /session            → { value: { sessionId } }
// - POST /session/{s}/element        with a locator strategy
// - POST /session/{s}/element/{e}/value   to type keystrokes
// - GET  /session/{s}/element/{e}/property/value  to read back
// - POST /session/{s}/execute/sync   to inject script
// - GET  /session/{s}/source         for the rendered page
//
// Element waits are poll-until-deadline because the protocol has no
// server-side wait. Yes, we reimplemented WebDriverWait. It's a loop.
// =============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::session::{DateQueryPage, SessionFault};

/// The form field the gazette uses for its date input.
const DATE_FIELD_NAME: &str = "dtDiario";

/// Locates the submit control by its label, because the form's element
/// ids change between deployments but the button always says Consultar.
const SUBMIT_XPATH: &str = "//input[@value='Consultar'] | //button[contains(., 'Consultar')]";

/// How long to poll for an element before declaring a timeout.
const ELEMENT_WAIT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Deserialize)]
struct WireValue<T> {
    value: T,
}

#[derive(Deserialize)]
struct NewSessionValue {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Deserialize)]
struct ElementRef {
    #[serde(rename = "element-6066-11e4-a52e-4f735466cecf")]
    id: String,
}

/// One live browser session speaking the WebDriver wire protocol.
///
/// Dropping this struct does NOT close the browser — call [`close`]
/// explicitly. The orchestrator owns the lifecycle and wants the close
/// error (if any) in its logs, not swallowed by a destructor.
///
/// [`close`]: WebDriverPage::close
pub struct WebDriverPage {
    http: reqwest::Client,
    endpoint: String,
    session_id: String,
    page_url: String,
}

impl WebDriverPage {
    /// Open a headless browser session and navigate to the query page.
    ///
    /// Any failure here is a [`SessionFault::Setup`]: the caller treats
    /// "no browser" the same as "no site" and goes straight to fallback.
    pub async fn open(endpoint: &str, page_url: &str) -> Result<Self, SessionFault> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SessionFault::Setup(format!("http client: {e}")))?;

        let caps = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--no-sandbox",
                            "--disable-dev-shm-usage",
                            "--window-size=1920,1080",
                        ]
                    }
                }
            }
        });

        let resp: WireValue<NewSessionValue> = http
            .post(format!("{endpoint}/session"))
            .json(&caps)
            .send()
            .await
            .map_err(|e| SessionFault::Setup(format!("webdriver unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| SessionFault::Setup(format!("session rejected: {e}")))?
            .json()
            .await
            .map_err(|e| SessionFault::Setup(format!("malformed session reply: {e}")))?;

        let page = Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            session_id: resp.value.session_id,
            page_url: page_url.to_string(),
        };

        info!(session = %page.session_id, url = %page_url, "browser session opened");
        page.navigate().await?;
        Ok(page)
    }

    /// End the browser session. Best called even on failure paths so the
    /// driver doesn't accumulate zombie browsers.
    pub async fn close(self) {
        let url = format!("{}/session/{}", self.endpoint, self.session_id);
        match self.http.delete(&url).send().await {
            Ok(_) => debug!(session = %self.session_id, "browser session closed"),
            Err(e) => warn!(session = %self.session_id, error = %e, "session close failed"),
        }
    }

    async fn navigate(&self) -> Result<(), SessionFault> {
        self.command("url", json!({ "url": self.page_url })).await?;
        Ok(())
    }

    fn session_url(&self, path: &str) -> String {
        format!("{}/session/{}/{}", self.endpoint, self.session_id, path)
    }

    /// POST a session-scoped command and return the raw `value`.
    async fn command(&self, path: &str, body: Value) -> Result<Value, SessionFault> {
        let resp = self
            .http
            .post(self.session_url(path))
            .json(&body)
            .send()
            .await
            .map_err(wire_fault)?;
        let status = resp.status();
        let parsed: WireValue<Value> = resp.json().await.map_err(wire_fault)?;
        if status.is_success() {
            Ok(parsed.value)
        } else {
            Err(protocol_fault(path, &parsed.value))
        }
    }

    /// GET a session-scoped value.
    async fn fetch(&self, path: &str) -> Result<Value, SessionFault> {
        let resp = self
            .http
            .get(self.session_url(path))
            .send()
            .await
            .map_err(wire_fault)?;
        let status = resp.status();
        let parsed: WireValue<Value> = resp.json().await.map_err(wire_fault)?;
        if status.is_success() {
            Ok(parsed.value)
        } else {
            Err(protocol_fault(path, &parsed.value))
        }
    }

    /// Find one element by locator strategy. A miss is an error on the
    /// wire, so a single probe doubles as an existence check.
    async fn find_element(&self, using: &str, value: &str) -> Result<String, SessionFault> {
        let reply = self
            .command("element", json!({ "using": using, "value": value }))
            .await?;
        let element: ElementRef =
            serde_json::from_value(reply).map_err(|e| SessionFault::Disconnected(e.to_string()))?;
        Ok(element.id)
    }

    /// Poll for an element until the deadline.
    async fn wait_for_element(
        &self,
        using: &str,
        value: &str,
        what: &str,
    ) -> Result<String, SessionFault> {
        let deadline = Instant::now() + ELEMENT_WAIT;
        loop {
            match self.find_element(using, value).await {
                Ok(id) => return Ok(id),
                // "no such element" arrives as a protocol error too, so
                // every miss keeps polling until the deadline. A session
                // that actually died just costs us one wait cycle.
                Err(_) if Instant::now() < deadline => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(fault) => {
                    return Err(match fault {
                        SessionFault::Disconnected(e) => SessionFault::Disconnected(e),
                        _ => SessionFault::Timeout(what.to_string()),
                    });
                }
            }
        }
    }

    async fn date_field(&self) -> Result<String, SessionFault> {
        self.wait_for_element("name", DATE_FIELD_NAME, "date field")
            .await
    }
}

fn wire_fault(e: reqwest::Error) -> SessionFault {
    if e.is_timeout() {
        SessionFault::Timeout("wire request".to_string())
    } else {
        SessionFault::Disconnected(e.to_string())
    }
}

/// Map a WebDriver error payload onto the fault taxonomy. The protocol
/// names its errors; "stale element reference" is the one we must
/// distinguish because the retry strategy differs.
fn protocol_fault(path: &str, value: &Value) -> SessionFault {
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    match error {
        "stale element reference" => SessionFault::StaleElement(path.to_string()),
        "timeout" | "script timeout" => SessionFault::Timeout(path.to_string()),
        "invalid session id" => SessionFault::Disconnected("session evaporated".to_string()),
        other => SessionFault::Disconnected(format!("{path}: {other}")),
    }
}

#[async_trait]
impl DateQueryPage for WebDriverPage {
    async fn wait_date_field(&mut self) -> Result<(), SessionFault> {
        self.date_field().await.map(|_| ())
    }

    async fn clear_date(&mut self) -> Result<(), SessionFault> {
        let id = self.date_field().await?;
        self.command(&format!("element/{id}/clear"), json!({})).await?;
        Ok(())
    }

    async fn type_date(&mut self, formatted: &str) -> Result<(), SessionFault> {
        let id = self.date_field().await?;
        self.command(
            &format!("element/{id}/value"),
            json!({ "text": formatted }),
        )
        .await?;
        Ok(())
    }

    async fn force_date(&mut self, formatted: &str) -> Result<(), SessionFault> {
        // Script injection bypasses the page's keystroke handlers, and
        // the change event afterwards keeps its form logic in sync.
        let script = "const f = document.getElementsByName(arguments[0])[0]; \
             f.value = arguments[1]; \
             f.dispatchEvent(new Event('change', { bubbles: true }));";
        self.command(
            "execute/sync",
            json!({ "script": script, "args": [DATE_FIELD_NAME, formatted] }),
        )
        .await?;
        Ok(())
    }

    async fn read_date(&mut self) -> Result<String, SessionFault> {
        let id = self.date_field().await?;
        let value = self.fetch(&format!("element/{id}/property/value")).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn wait_submit_ready(&mut self) -> Result<(), SessionFault> {
        let id = self
            .wait_for_element("xpath", SUBMIT_XPATH, "submit control")
            .await?;
        let enabled = self.fetch(&format!("element/{id}/enabled")).await?;
        if enabled.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(SessionFault::Timeout("submit control".to_string()))
        }
    }

    async fn submit(&mut self) -> Result<(), SessionFault> {
        let id = self
            .wait_for_element("xpath", SUBMIT_XPATH, "submit control")
            .await?;
        self.command(&format!("element/{id}/click"), json!({})).await?;
        Ok(())
    }

    async fn wait_loaded(&mut self) -> Result<(), SessionFault> {
        // The result page is loaded when document.readyState settles.
        let deadline = Instant::now() + ELEMENT_WAIT;
        loop {
            let state = self
                .command(
                    "execute/sync",
                    json!({ "script": "return document.readyState;", "args": [] }),
                )
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionFault::Timeout("result page load".to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn page_text(&mut self) -> Result<String, SessionFault> {
        let value = self
            .command(
                "execute/sync",
                json!({ "script": "return document.body.innerText;", "args": [] }),
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn reload(&mut self) -> Result<(), SessionFault> {
        self.navigate().await
    }
}
