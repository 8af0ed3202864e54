//! Query Planner
//!
//! Turns a natural-language intent into an immutable [`ComplexQuery`]
//! (`crate::types::ComplexQuery`).
//!
//! ## Phases
//!
//! 1. **Classification** (`corpus`): weighted keyword matching, case and
//!    diacritic insensitive, yields `Low`, `Medium` or `High`.
//! 2. **Decomposition** (`patterns`): a closed registry of tagged pattern
//!    descriptors produces sub-queries with stable ids (`sq_courses`,
//!    `sq_enrollments`, ...). Low intents always get one sub-query.
//! 3. **Validation** (`dag`): ids are unique, dependencies exist, the graph
//!    is acyclic.
//! 4. **Scheduling** (`estimate`): streaming strategy and time estimate.
//!
//! [`ComplexQuery`]: crate::types::ComplexQuery

pub mod corpus;
pub mod dag;
pub mod estimate;
pub mod patterns;
pub mod query_planner;

pub use corpus::{fold_text, ClassificationSignals, ComplexityClassifier, KeywordCorpus};
pub use dag::QueryDag;
pub use estimate::{estimate_time_ms, select_strategy};
pub use patterns::{known_patterns, PatternDescriptor, PatternKind};
pub use query_planner::{Classification, QueryPlanner, GENERIC_SUB_QUERY_ID, MAIN_SUB_QUERY_ID};
