//! Analyzers turning ranked candidates into a draft recipe.
//!
//! Two paths produce the same artifacts:
//!
//! - [`heuristic`]: pure, conservative; drafts a recipe without any LLM call
//!   when the confidence gates all pass.
//! - [`analyzer`]: prompts an LLM with sanitized candidate signals, strictly
//!   parses the reply, and validates it against closed rules. Invalid output
//!   downgrades to "no recipe produced", never to a best-effort fix.

pub mod analyzer;
pub mod heuristic;
pub mod prompts;

pub use analyzer::{build_recipe_from_validation, validate_analysis, RecipeAnalyzer};
pub use heuristic::{try_build_heuristic_draft, HeuristicDraft};
