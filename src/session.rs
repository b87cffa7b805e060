// =============================================================================
// session.rs — THE BROWSER WHISPERER
// =============================================================================
//
// One retrieval session against the gazette's query page. The page is a
// government web form from an era when "single page application" meant a
// fax machine, and it defends itself with anti-automation measures that
// manifest as very specific misbehavior:
//
// - You write a date into the date field. You read it back. It's EMPTY.
//   The JavaScript on the page ate your keystrokes.
// - You escalate: set the field value directly via script injection.
//   Read it back. STILL empty. That's not flakiness, that's a bouncer.
// - Or the form fills fine but the submit control never becomes
//   interactable. Same bouncer, different door.
//
// This module encodes that folklore as a typed protocol. The transport
// (a real browser over the WebDriver wire, or a scripted fake in tests)
// lives behind the `DateQueryPage` trait; the driver here only speaks in
// capabilities: clear, type, force, read back, submit. The driver never
// guesses WHY the page misbehaved — it reports a precise fault and lets
// the outage detector make the blocked-or-transient call.
// =============================================================================

use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Everything that can go wrong while driving the query page, in order of
/// increasing suspicion. The first three are infrastructure being
/// infrastructure; the last two are the page actively refusing us.
#[derive(Debug, Error)]
pub enum SessionFault {
    /// The transport never came up: browser missing, WebDriver endpoint
    /// unreachable, session handshake rejected.
    #[error("session setup failed: {0}")]
    Setup(String),

    /// An operation exceeded its deadline. Slow government server, slow
    /// network, slow everything. Retryable.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The element we held a handle to was replaced under us. The page
    /// re-rendered mid-interaction. Retryable after a reload.
    #[error("stale element: {0}")]
    StaleElement(String),

    /// The transport died mid-session.
    #[error("transport disconnected: {0}")]
    Disconnected(String),

    /// The blocking signature, form half: the date field reads back empty
    /// after BOTH the normal write and the script-injection fallback.
    #[error("date input rejected for {date} — field reads back empty after forced write")]
    InputRejected { date: NaiveDate },

    /// The blocking signature, button half: the submit control never
    /// became interactable on a fresh page.
    #[error("submit control never became ready for {date}")]
    ControlUnready { date: NaiveDate },
}

impl SessionFault {
    /// True for the two faults that form the anti-automation signature.
    /// Everything else is ordinary flakiness.
    pub fn is_blocking_signature(&self) -> bool {
        matches!(
            self,
            SessionFault::InputRejected { .. } | SessionFault::ControlUnready { .. }
        )
    }
}

/// The capabilities one gazette query page exposes, transport-agnostic.
///
/// The production impl drives a headless browser over the WebDriver wire
/// protocol; tests use scripted fakes that misbehave on cue. Every method
/// is fallible because every method talks to something that hates us.
#[async_trait]
pub trait DateQueryPage: Send {
    /// Block until the date input exists in the DOM (or time out).
    async fn wait_date_field(&mut self) -> Result<(), SessionFault>;

    /// Clear whatever is in the date input.
    async fn clear_date(&mut self) -> Result<(), SessionFault>;

    /// Type the date into the input, keystroke-style.
    async fn type_date(&mut self, formatted: &str) -> Result<(), SessionFault>;

    /// Set the input value by script injection, bypassing the page's
    /// keystroke handlers. The escalation path.
    async fn force_date(&mut self, formatted: &str) -> Result<(), SessionFault>;

    /// Read the input's current value back. The ground truth check.
    async fn read_date(&mut self) -> Result<String, SessionFault>;

    /// Block until the submit control is present AND interactable.
    async fn wait_submit_ready(&mut self) -> Result<(), SessionFault>;

    /// Click submit.
    async fn submit(&mut self) -> Result<(), SessionFault>;

    /// Block until the result page has rendered.
    async fn wait_loaded(&mut self) -> Result<(), SessionFault>;

    /// The rendered page text, for the extractor to chew on.
    async fn page_text(&mut self) -> Result<String, SessionFault>;

    /// Reload the query page from scratch. Used between retry attempts.
    async fn reload(&mut self) -> Result<(), SessionFault>;
}

/// Date format the form expects: dd/mm/YYYY, the Brazilian way.
pub fn format_form_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// How long we give the page's own JavaScript to settle after a write
/// before trusting the read-back.
const POST_WRITE_SETTLE: Duration = Duration::from_millis(500);

/// Drives one `DateQueryPage` through the query protocol for single dates.
///
/// Owns no retry policy — it makes exactly ONE attempt per call and
/// reports faults precisely. The orchestrator decides whether to reload
/// and retry or to declare the site blocked.
pub struct RetrievalSession<P: DateQueryPage> {
    page: P,
}

impl<P: DateQueryPage> RetrievalSession<P> {
    pub fn new(page: P) -> Self {
        Self { page }
    }

    /// Hand the page back so the owner can close it properly.
    pub fn into_page(self) -> P {
        self.page
    }

    /// Query one gazette date and return the candidate notice fragments
    /// from the result page.
    pub async fn fetch_date(&mut self, date: NaiveDate) -> Result<Vec<String>, SessionFault> {
        let formatted = format_form_date(date);
        debug!(date = %formatted, "querying gazette date");

        self.fill_date_verified(date, &formatted).await?;

        self.page.wait_submit_ready().await.map_err(|fault| {
            // A submit control that won't wake up on a page whose form we
            // just filled successfully is the button half of the blocking
            // signature, not a timeout to shrug off.
            if matches!(fault, SessionFault::Timeout(_)) {
                SessionFault::ControlUnready { date }
            } else {
                fault
            }
        })?;
        self.page.submit().await?;
        self.page.wait_loaded().await?;

        let text = self.page.page_text().await?;
        let fragments = crate::patterns::split_into_fragments(&text);
        info!(
            date = %formatted,
            fragments = fragments.len(),
            "result page retrieved"
        );
        Ok(fragments)
    }

    /// Reload the query page between attempts.
    pub async fn reload(&mut self) -> Result<(), SessionFault> {
        self.page.reload().await
    }

    /// The write-verify-escalate-verify dance.
    ///
    /// Write the date, let the page's scripts settle, read it back. An
    /// EMPTY read-back triggers the script-injection fallback; if even
    /// the forced write reads back empty, that is the form half of the
    /// blocking signature and we stop pretending. A NON-empty mismatch
    /// (the page reformatted our input) is logged and accepted — the
    /// field has content, the form will submit.
    async fn fill_date_verified(
        &mut self,
        date: NaiveDate,
        formatted: &str,
    ) -> Result<(), SessionFault> {
        self.page.wait_date_field().await?;
        self.page.clear_date().await?;
        self.page.type_date(formatted).await?;
        tokio::time::sleep(POST_WRITE_SETTLE).await;

        let readback = self.page.read_date().await?;
        if readback == formatted {
            return Ok(());
        }
        if !readback.is_empty() {
            warn!(
                wrote = %formatted,
                read = %readback,
                "date field reformatted our input — accepting it"
            );
            return Ok(());
        }

        warn!(date = %formatted, "typed date vanished — escalating to script injection");
        self.page.force_date(formatted).await?;
        tokio::time::sleep(POST_WRITE_SETTLE).await;

        let readback = self.page.read_date().await?;
        if readback.is_empty() {
            Err(SessionFault::InputRejected { date })
        } else {
            debug!(date = %formatted, "forced write stuck — proceeding");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A scripted page fake. Each field is a queue of canned responses;
    /// the driver's behavior under misbehavior is what we're testing.
    #[derive(Default)]
    struct FakePage {
        readbacks: Vec<String>,
        submit_ready: Vec<Result<(), SessionFault>>,
        typed: Vec<String>,
        forced: Vec<String>,
        reloads: usize,
        text: String,
    }

    impl FakePage {
        fn pop_readback(&mut self) -> String {
            if self.readbacks.is_empty() {
                String::new()
            } else {
                self.readbacks.remove(0)
            }
        }
    }

    #[async_trait]
    impl DateQueryPage for FakePage {
        async fn wait_date_field(&mut self) -> Result<(), SessionFault> {
            Ok(())
        }
        async fn clear_date(&mut self) -> Result<(), SessionFault> {
            Ok(())
        }
        async fn type_date(&mut self, formatted: &str) -> Result<(), SessionFault> {
            self.typed.push(formatted.to_string());
            Ok(())
        }
        async fn force_date(&mut self, formatted: &str) -> Result<(), SessionFault> {
            self.forced.push(formatted.to_string());
            Ok(())
        }
        async fn read_date(&mut self) -> Result<String, SessionFault> {
            Ok(self.pop_readback())
        }
        async fn wait_submit_ready(&mut self) -> Result<(), SessionFault> {
            if self.submit_ready.is_empty() {
                Ok(())
            } else {
                self.submit_ready.remove(0)
            }
        }
        async fn submit(&mut self) -> Result<(), SessionFault> {
            Ok(())
        }
        async fn wait_loaded(&mut self) -> Result<(), SessionFault> {
            Ok(())
        }
        async fn page_text(&mut self) -> Result<String, SessionFault> {
            Ok(self.text.clone())
        }
        async fn reload(&mut self) -> Result<(), SessionFault> {
            self.reloads += 1;
            Ok(())
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 17).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_write_needs_no_escalation() {
        let page = FakePage {
            readbacks: vec!["17/03/2025".to_string()],
            text: "0001234-56.2025.8.26.0100 conteúdo".to_string(),
            ..Default::default()
        };
        let mut session = RetrievalSession::new(page);
        let fragments = session.fetch_date(date()).await.unwrap();
        assert_eq!(fragments.len(), 1);
        assert!(session.page.forced.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_readback_escalates_then_succeeds() {
        let page = FakePage {
            readbacks: vec![String::new(), "17/03/2025".to_string()],
            ..Default::default()
        };
        let mut session = RetrievalSession::new(page);
        session.fetch_date(date()).await.unwrap();
        assert_eq!(session.page.forced, vec!["17/03/2025"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_empty_readback_is_input_rejection() {
        let page = FakePage {
            readbacks: vec![String::new(), String::new()],
            ..Default::default()
        };
        let mut session = RetrievalSession::new(page);
        let fault = session.fetch_date(date()).await.unwrap_err();
        assert!(matches!(fault, SessionFault::InputRejected { .. }));
        assert!(fault.is_blocking_signature());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reformatted_readback_is_accepted() {
        // The page normalized "17/03/2025" to "17-03-2025". Content is
        // content; no escalation, no fault.
        let page = FakePage {
            readbacks: vec!["17-03-2025".to_string()],
            ..Default::default()
        };
        let mut session = RetrievalSession::new(page);
        session.fetch_date(date()).await.unwrap();
        assert!(session.page.forced.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_timeout_becomes_control_unready() {
        let page = FakePage {
            readbacks: vec!["17/03/2025".to_string()],
            submit_ready: vec![Err(SessionFault::Timeout("submit".to_string()))],
            ..Default::default()
        };
        let mut session = RetrievalSession::new(page);
        let fault = session.fetch_date(date()).await.unwrap_err();
        assert!(matches!(fault, SessionFault::ControlUnready { .. }));
        assert!(fault.is_blocking_signature());
    }

    #[test]
    fn test_form_date_format() {
        assert_eq!(format_form_date(date()), "17/03/2025");
    }
}
