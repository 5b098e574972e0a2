//! Scan session state machine: idle → scanning → analyzing → reviewed.
//!
//! The controller is the only writer of [`ScanHistory`]. Classification runs
//! outside of it; results come back through [`SessionController::complete_analysis`]
//! carrying the [`AnalysisTicket`] issued at stop time, and are dropped when the
//! session they belong to is no longer the one being analyzed.

use std::{fmt, sync::Arc};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::{
    classifier::{unavailable_assessment, RiskClassifier},
    history::ScanHistory,
    model::{Assessment, MetricSnapshot, ScanRecord},
    simulator::{MetricSimulator, RunningSimulator},
};

/// Screens the presentation layer can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Welcome,
    LiveScan,
    Analysis,
    History,
    Trends,
    Guidance,
}

/// Observable view of the session phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scanning(MetricSnapshot),
    Analyzing(MetricSnapshot),
    Reviewed(ScanRecord),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning(_) => "scanning",
            Self::Analyzing(_) => "analyzing",
            Self::Reviewed(_) => "reviewed",
        }
    }
}

/// Proof that a specific session was stopped and awaits classification.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisTicket {
    session: u64,
    snapshot: MetricSnapshot,
}

impl AnalysisTicket {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn snapshot(&self) -> &MetricSnapshot {
        &self.snapshot
    }
}

/// Result of handing a classification back to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Reviewed(ScanRecord),
    /// The ticket's session was superseded; nothing was recorded.
    Stale,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error("no scan with id `{0}` in history")]
    UnknownRecord(String),
}

enum Phase {
    Idle,
    Scanning {
        session: u64,
        feed: RunningSimulator,
    },
    Analyzing(AnalysisTicket),
    Reviewed(ScanRecord),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning { .. } => "scanning",
            Self::Analyzing(_) => "analyzing",
            Self::Reviewed(_) => "reviewed",
        }
    }
}

pub struct SessionController {
    simulator: MetricSimulator,
    history: ScanHistory,
    phase: Phase,
    screen: Screen,
    last_session: u64,
}

impl SessionController {
    pub fn new(simulator: MetricSimulator, history: ScanHistory) -> Self {
        Self {
            simulator,
            history,
            phase: Phase::Idle,
            screen: Screen::Welcome,
            last_session: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.phase {
            Phase::Idle => SessionState::Idle,
            Phase::Scanning { feed, .. } => SessionState::Scanning(feed.latest()),
            Phase::Analyzing(ticket) => SessionState::Analyzing(ticket.snapshot),
            Phase::Reviewed(record) => SessionState::Reviewed(record.clone()),
        }
    }

    pub fn history(&self) -> &ScanHistory {
        &self.history
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    /// Record currently on display, if the session is reviewed.
    pub fn active_record(&self) -> Option<&ScanRecord> {
        match &self.phase {
            Phase::Reviewed(record) => Some(record),
            _ => None,
        }
    }

    /// Live snapshot stream of the running scan.
    pub fn live_feed(&self) -> Option<watch::Receiver<MetricSnapshot>> {
        match &self.phase {
            Phase::Scanning { feed, .. } => Some(feed.subscribe()),
            _ => None,
        }
    }

    pub fn navigate(&mut self, screen: Screen) {
        self.screen = screen;
    }

    /// Begin a new session. A pending analysis, if any, is abandoned.
    pub fn start_scan(&mut self) -> Result<(), SessionError> {
        if let Phase::Scanning { .. } = self.phase {
            return Err(self.invalid("start a scan"));
        }
        if let Phase::Analyzing(ticket) = &self.phase {
            debug!(session = ticket.session, "abandoning pending analysis");
        }
        self.last_session += 1;
        let session = self.last_session;
        self.phase = Phase::Scanning {
            session,
            feed: self.simulator.start(),
        };
        self.screen = Screen::LiveScan;
        info!(session, "scan started");
        Ok(())
    }

    /// Stop the running scan and hand out the ticket for its classification.
    pub fn stop_scan(&mut self) -> Result<AnalysisTicket, SessionError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Scanning { session, feed } => {
                let snapshot = feed.stop();
                let ticket = AnalysisTicket { session, snapshot };
                self.phase = Phase::Analyzing(ticket.clone());
                self.screen = Screen::Analysis;
                info!(session, ?snapshot, "scan stopped; awaiting classification");
                Ok(ticket)
            }
            other => {
                self.phase = other;
                Err(self.invalid("stop a scan"))
            }
        }
    }

    /// Abandon the running scan without producing a record.
    pub fn cancel_scan(&mut self) -> Result<(), SessionError> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Scanning { session, feed } => {
                drop(feed);
                self.screen = Screen::Welcome;
                info!(session, "scan cancelled");
                Ok(())
            }
            other => {
                self.phase = other;
                Err(self.invalid("cancel a scan"))
            }
        }
    }

    /// Apply a classification outcome for `ticket`.
    ///
    /// A rejected classification is recorded with the fallback assessment, so the
    /// session always leaves `Analyzing`. Outcomes for superseded sessions are
    /// discarded.
    pub fn complete_analysis<E: fmt::Display>(
        &mut self,
        ticket: &AnalysisTicket,
        outcome: Result<Assessment, E>,
    ) -> Completion {
        let current = match &self.phase {
            Phase::Analyzing(pending) if pending.session == ticket.session => pending.snapshot,
            _ => {
                debug!(
                    session = ticket.session,
                    state = self.phase.name(),
                    "discarding stale classification"
                );
                return Completion::Stale;
            }
        };
        let assessment = outcome.unwrap_or_else(|err| {
            warn!(session = ticket.session, error = %err, "classification rejected; using fallback");
            unavailable_assessment()
        });
        let record = ScanRecord::classified(current, assessment);
        self.history.append(record.clone());
        self.phase = Phase::Reviewed(record.clone());
        info!(session = ticket.session, id = %record.id, risk = %record.risk, "scan reviewed");
        Completion::Reviewed(record)
    }

    /// Stop, classify and record in one step while holding the controller.
    pub async fn analyze(&mut self, classifier: &RiskClassifier) -> Result<Completion, SessionError> {
        let ticket = self.stop_scan()?;
        let assessment = classifier.classify(ticket.snapshot()).await;
        Ok(self.complete_analysis(&ticket, Ok::<_, SessionError>(assessment)))
    }

    /// Re-display a stored record. Classification is never repeated.
    pub fn select_history_record(&mut self, id: &str) -> Result<ScanRecord, SessionError> {
        if !matches!(self.phase, Phase::Idle | Phase::Reviewed(_)) {
            return Err(self.invalid("select a history record"));
        }
        let record = self
            .history
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownRecord(id.to_string()))?;
        debug!(id, "re-displaying stored scan");
        self.screen = Screen::Analysis;
        self.phase = Phase::Reviewed(record.clone());
        Ok(record)
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            action,
            state: self.phase.name(),
        }
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.phase.name())
            .field("screen", &self.screen)
            .field("history_len", &self.history.len())
            .field("last_session", &self.last_session)
            .finish()
    }
}

/// Controller shared between the presentation layer and in-flight analyses.
pub type SharedSession = Arc<Mutex<SessionController>>;

pub fn shared(controller: SessionController) -> SharedSession {
    Arc::new(Mutex::new(controller))
}

/// Stop the current scan and classify it without holding the lock across the
/// network call, so other intents (including a new scan) stay responsive.
pub async fn run_analysis(
    session: &SharedSession,
    classifier: &RiskClassifier,
) -> Result<Completion, SessionError> {
    let ticket = session.lock().await.stop_scan()?;
    let assessment = classifier.classify(ticket.snapshot()).await;
    let completion = session
        .lock()
        .await
        .complete_analysis(&ticket, Ok::<_, SessionError>(assessment));
    Ok(completion)
}
