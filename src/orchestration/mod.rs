pub mod analysis_orchestrator;

pub use analysis_orchestrator::{default_prompt, AnalysisOrchestrator};
