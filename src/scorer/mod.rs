pub mod category;
pub mod rule_scorer;
pub mod rules;

pub use rule_scorer::RuleScorer;
