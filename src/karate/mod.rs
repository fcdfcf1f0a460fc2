//! # Karate
//!
//! Feature files as a second way to author tests. The parser builds a
//! [`FeatureModel`], the converter maps it onto a collection and back, and
//! the orchestrator hands the result to the regular engine so feature runs
//! report exactly like collection runs.

mod converter;
mod file;
mod model;
mod orchestrator;
mod parser;

pub use converter::KarateConverter;
pub use file::KarateFeatureFile;
pub use model::{Background, Examples, FeatureModel, Scenario, Step, StepKeyword};
pub use orchestrator::{KarateOrchestrator, TagFilter};
pub use parser::KarateFeatureParser;
