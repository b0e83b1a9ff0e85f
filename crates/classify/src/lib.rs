pub mod classifier;
pub mod patterns;

pub use classifier::{AnalysisEnhancer, Enhancement, ErrorClassifier};
pub use patterns::{default_rules, PatternRule};
