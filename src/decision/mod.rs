// Oracle-driven trade decisions
pub mod engine;
pub mod prompt;

pub use engine::{
    apply_fallback, extract_json, investment_for, parse_decision, DecisionEngine, Verdict,
};
pub use prompt::render_prompt;
