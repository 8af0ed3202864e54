//! Query Planner
//!
//! Converts a free-form intent into a [`ComplexQuery`]: classify, decompose,
//! validate the dependency graph, pick a streaming strategy and estimate the
//! execution time. Pure and deterministic for a given intent and corpus.

use crate::config::PlannerConfig;
use crate::error::PlanError;
use crate::planner::corpus::{fold_text, ClassificationSignals, ComplexityClassifier};
use crate::planner::dag::QueryDag;
use crate::planner::estimate::{estimate_time_ms, select_strategy};
use crate::planner::patterns::{self, PatternDescriptor};
use crate::types::{ComplexQuery, Complexity, Priority, SubQuery};

/// Id of the single sub-query produced for Low-complexity intents.
pub const MAIN_SUB_QUERY_ID: &str = "sq_main";
/// Id of the fallback sub-query when no pattern matches a non-Low intent.
pub const GENERIC_SUB_QUERY_ID: &str = "sq_generic";

const MAIN_EXPECTED_RESULTS: u32 = 10;
const GENERIC_EXPECTED_RESULTS: u32 = 25;

/// Classification outcome, exposed for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub complexity: Complexity,
    pub signals: ClassificationSignals,
}

pub struct QueryPlanner {
    config: PlannerConfig,
    classifier: ComplexityClassifier,
    patterns: &'static [PatternDescriptor],
}

impl QueryPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        let classifier = build_classifier(&config);
        Self {
            config,
            classifier,
            patterns: patterns::known_patterns(),
        }
    }

    /// Replace the keyword corpus used for classification.
    pub fn with_corpus(mut self, corpus: crate::planner::corpus::KeywordCorpus) -> Self {
        self.config.corpus = Some(corpus);
        self.classifier = build_classifier(&self.config);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn classify(&self, intent: &str) -> Classification {
        let (complexity, signals) = self.classifier.classify(intent);
        Classification {
            complexity,
            signals,
        }
    }

    /// Plan an intent with the planner's own configuration.
    ///
    /// Never fails on user text; only a corrupt pattern registry is an error.
    pub fn plan(&self, intent: &str) -> Result<ComplexQuery, PlanError> {
        self.plan_inner(intent, &self.config, &self.classifier)
    }

    /// Plan an intent with a one-off configuration override.
    pub fn plan_with_config(
        &self,
        intent: &str,
        config: &PlannerConfig,
    ) -> Result<ComplexQuery, PlanError> {
        let classifier = build_classifier(config);
        self.plan_inner(intent, config, &classifier)
    }

    fn plan_inner(
        &self,
        intent: &str,
        config: &PlannerConfig,
        classifier: &ComplexityClassifier,
    ) -> Result<ComplexQuery, PlanError> {
        patterns::validate_registry(self.patterns)?;

        let original_intent = intent.trim().to_string();
        let folded = fold_text(&original_intent);
        let (complexity, signals) = classifier.classify(&original_intent);
        let filters = patterns::extract_filters(&original_intent, &folded);

        let sub_queries = match complexity {
            Complexity::Low => {
                let data_source = patterns::infer_data_source(&folded)
                    .map(str::to_string)
                    .unwrap_or_else(|| config.default_data_source.clone());
                let mut sq = SubQuery::new(MAIN_SUB_QUERY_ID, original_intent.clone(), data_source)
                    .with_expected_results(MAIN_EXPECTED_RESULTS)
                    .with_priority(Priority::High);
                sq.filters = filters;
                vec![sq]
            }
            Complexity::Medium | Complexity::High => {
                let decomposed = patterns::decompose(self.patterns, &folded, &filters);
                if decomposed.is_empty() {
                    let mut sq = SubQuery::new(
                        GENERIC_SUB_QUERY_ID,
                        original_intent.clone(),
                        config.default_data_source.clone(),
                    )
                    .with_expected_results(GENERIC_EXPECTED_RESULTS)
                    .with_priority(Priority::High);
                    sq.filters = filters;
                    vec![sq]
                } else {
                    decomposed
                }
            }
        };

        let dag = QueryDag::build(&sub_queries)
            .map_err(|e| PlanError::CorruptPatternRegistry(e.to_string()))?;
        let streaming_strategy = select_strategy(complexity, &dag);
        let estimated_time_ms = estimate_time_ms(&sub_queries, &dag, streaming_strategy, config);

        log::info!(
            "Planned intent: complexity={:?} strategy={:?} sub_queries={} estimate={}ms",
            complexity,
            streaming_strategy,
            sub_queries.len(),
            estimated_time_ms
        );
        log::debug!(
            "Classification signals: high={:?} medium={:?} entity={:?}",
            signals.high,
            signals.medium,
            signals.entity
        );

        Ok(ComplexQuery {
            original_intent,
            complexity,
            sub_queries,
            streaming_strategy,
            estimated_time_ms,
        })
    }
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new(PlannerConfig::default())
    }
}

fn build_classifier(config: &PlannerConfig) -> ComplexityClassifier {
    let corpus = config.corpus.clone().unwrap_or_default();
    ComplexityClassifier::new(
        &corpus,
        config.high_match_threshold,
        config.medium_match_threshold,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::corpus::KeywordCorpus;
    use crate::types::StreamingStrategy;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_dashboard_scenario() {
        let plan = QueryPlanner::default()
            .plan("dashboard de cursos em São Paulo")
            .unwrap();
        assert_eq!(plan.complexity, Complexity::High);
        assert!(!plan.sub_queries.is_empty());
        assert!(matches!(
            plan.streaming_strategy,
            StreamingStrategy::Parallel | StreamingStrategy::Hybrid
        ));
        assert_eq!(plan.sub_queries[0].id, "sq_courses");
        assert_eq!(
            plan.sub_queries[0].filters.get("location"),
            Some(&json!("São Paulo"))
        );
    }

    #[test]
    fn test_simple_question_scenario() {
        let plan = QueryPlanner::default()
            .plan("qual é o nome do primeiro curso?")
            .unwrap();
        assert_eq!(plan.complexity, Complexity::Low);
        assert_eq!(plan.sub_queries.len(), 1);
        assert_eq!(plan.streaming_strategy, StreamingStrategy::Sequential);
        assert_eq!(plan.sub_queries[0].id, MAIN_SUB_QUERY_ID);
        assert_eq!(plan.sub_queries[0].description, "qual é o nome do primeiro curso?");
        assert_eq!(plan.sub_queries[0].data_source, "courses");
    }

    #[test]
    fn test_empty_intent_falls_back() {
        let planner = QueryPlanner::default();
        for intent in ["", "   ", "?!?"] {
            let plan = planner.plan(intent).unwrap();
            assert_eq!(plan.complexity, Complexity::Low);
            assert_eq!(plan.sub_queries.len(), 1);
            assert_eq!(plan.sub_queries[0].data_source, "default");
            assert!(plan.estimated_time_ms > 0);
        }
    }

    #[test]
    fn test_unmatched_high_intent_uses_generic() {
        let plan = QueryPlanner::default().plan("painel geral").unwrap();
        assert_eq!(plan.complexity, Complexity::High);
        assert_eq!(plan.sub_query_ids(), vec![GENERIC_SUB_QUERY_ID]);
        assert_eq!(plan.streaming_strategy, StreamingStrategy::Parallel);
    }

    #[test]
    fn test_hybrid_plan() {
        let plan = QueryPlanner::default()
            .plan("dashboard com total de matrículas por curso")
            .unwrap();
        assert_eq!(
            plan.sub_query_ids(),
            vec!["sq_courses", "sq_enrollments", "sq_metrics"]
        );
        assert_eq!(plan.streaming_strategy, StreamingStrategy::Hybrid);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_linear_plan_is_sequential() {
        let plan = QueryPlanner::default().plan("evolução das vendas").unwrap();
        assert_eq!(plan.complexity, Complexity::Medium);
        assert_eq!(plan.sub_query_ids(), vec!["sq_sales", "sq_trends"]);
        assert_eq!(plan.streaming_strategy, StreamingStrategy::Sequential);
    }

    #[test]
    fn test_planning_is_deterministic() {
        let planner = QueryPlanner::default();
        let intent = "painel com ranking de vendas e matrículas em 2024";
        assert_eq!(planner.plan(intent).unwrap(), planner.plan(intent).unwrap());
    }

    #[test]
    fn test_plan_with_config_override() {
        let planner = QueryPlanner::default();
        let config = PlannerConfig {
            corpus: Some(KeywordCorpus {
                high: vec!["cockpit".into()],
                medium: vec![],
                entity: vec![],
            }),
            max_estimate_ms: 50,
            ..PlannerConfig::default()
        };
        let plan = planner.plan_with_config("cockpit de cursos", &config).unwrap();
        assert_eq!(plan.complexity, Complexity::High);
        assert!(plan.estimated_time_ms < 50);

        // The planner's own configuration is untouched.
        assert_eq!(planner.plan("cockpit").unwrap().complexity, Complexity::Low);
    }

    #[test]
    fn test_with_corpus() {
        let planner = QueryPlanner::default().with_corpus(KeywordCorpus {
            high: vec![],
            medium: vec!["resumo".into()],
            entity: vec![],
        });
        assert_eq!(planner.classify("resumo das vendas").complexity, Complexity::Medium);
    }
}
