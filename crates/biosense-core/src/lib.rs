pub mod classifier;
pub mod history;
pub mod llm;
pub mod model;
pub mod report;
pub mod session;
pub mod simulator;

pub use classifier::RiskClassifier;
pub use history::{ScanHistory, TrendPoint};
pub use llm::{AnalysisError, LlmClient, LlmOverrides, LlmSettings, ProviderKind};
pub use model::{Assessment, MetricChannel, MetricSnapshot, RiskLevel, ScanRecord};
pub use session::{
    run_analysis, shared, AnalysisTicket, Completion, Screen, SessionController, SessionError,
    SessionState, SharedSession,
};
pub use simulator::{MetricSimulator, RunningSimulator, SimulatorConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shared_session_builds_from_crate_root() {
        let session = shared(SessionController::new(
            MetricSimulator::default(),
            ScanHistory::sample(),
        ));
        let guard = session.lock().await;
        assert_eq!(guard.state(), SessionState::Idle);
        assert_eq!(guard.history().len(), 4);
    }
}
