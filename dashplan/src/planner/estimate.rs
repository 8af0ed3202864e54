//! Streaming strategy selection and execution-time estimation.

use crate::config::PlannerConfig;
use crate::planner::dag::QueryDag;
use crate::types::{Complexity, StreamingStrategy, SubQuery};

/// Pick the scheduling policy for a validated plan graph.
pub fn select_strategy(complexity: Complexity, dag: &QueryDag) -> StreamingStrategy {
    if complexity == Complexity::Low {
        return StreamingStrategy::Sequential;
    }
    if dag.is_independent() {
        StreamingStrategy::Parallel
    } else if dag.is_linear_chain() {
        StreamingStrategy::Sequential
    } else {
        StreamingStrategy::Hybrid
    }
}

fn sub_query_cost(sq: &SubQuery, config: &PlannerConfig) -> f64 {
    config.base_cost_ms as f64 + sq.expected_results as f64 * config.per_result_cost_ms.max(0.0)
}

/// Estimated wall time in milliseconds, always in `1..max_estimate_ms`.
///
/// Levels of the graph run one after another. Within a level the cost is
/// summed, then divided by the usable concurrency unless the plan is
/// sequential.
pub fn estimate_time_ms(
    sub_queries: &[SubQuery],
    dag: &QueryDag,
    strategy: StreamingStrategy,
    config: &PlannerConfig,
) -> u64 {
    let concurrency = config.concurrency.max(1);
    let total: f64 = dag
        .levels()
        .iter()
        .map(|level| {
            let level_cost: f64 = level
                .iter()
                .map(|&i| sub_query_cost(&sub_queries[i], config))
                .sum();
            match strategy {
                StreamingStrategy::Sequential => level_cost,
                StreamingStrategy::Parallel | StreamingStrategy::Hybrid => {
                    level_cost / concurrency.min(level.len()).max(1) as f64
                }
            }
        })
        .sum();

    let ceiling = config.max_estimate_ms.saturating_sub(1).max(1);
    if !total.is_finite() {
        return ceiling;
    }
    (total.ceil() as u64).clamp(1, ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(id: &str, deps: &[&str], expected: u32) -> SubQuery {
        SubQuery::new(id, id, "default")
            .with_expected_results(expected)
            .with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_strategy_rules() {
        let independent = vec![sq("a", &[], 1), sq("b", &[], 1)];
        let chain = vec![sq("a", &[], 1), sq("b", &["a"], 1)];
        let hybrid = vec![sq("a", &[], 1), sq("b", &[], 1), sq("c", &["a", "b"], 1)];
        let single = vec![sq("a", &[], 1)];

        let dag = |sqs: &[SubQuery]| QueryDag::build(sqs).unwrap();
        assert_eq!(
            select_strategy(Complexity::Low, &dag(&independent)),
            StreamingStrategy::Sequential
        );
        assert_eq!(
            select_strategy(Complexity::High, &dag(&independent)),
            StreamingStrategy::Parallel
        );
        assert_eq!(
            select_strategy(Complexity::Medium, &dag(&chain)),
            StreamingStrategy::Sequential
        );
        assert_eq!(
            select_strategy(Complexity::High, &dag(&hybrid)),
            StreamingStrategy::Hybrid
        );
        assert_eq!(
            select_strategy(Complexity::High, &dag(&single)),
            StreamingStrategy::Parallel
        );
    }

    #[test]
    fn test_parallel_discount() {
        let config = PlannerConfig {
            base_cost_ms: 100,
            per_result_cost_ms: 1.0,
            concurrency: 2,
            ..PlannerConfig::default()
        };
        let sqs = vec![sq("a", &[], 100), sq("b", &[], 100)];
        let dag = QueryDag::build(&sqs).unwrap();
        assert_eq!(
            estimate_time_ms(&sqs, &dag, StreamingStrategy::Sequential, &config),
            400
        );
        assert_eq!(
            estimate_time_ms(&sqs, &dag, StreamingStrategy::Parallel, &config),
            200
        );
    }

    #[test]
    fn test_hybrid_levels_add_up() {
        let config = PlannerConfig {
            base_cost_ms: 100,
            per_result_cost_ms: 0.0,
            concurrency: 4,
            ..PlannerConfig::default()
        };
        let sqs = vec![sq("a", &[], 1), sq("b", &[], 1), sq("c", &["a", "b"], 1)];
        let dag = QueryDag::build(&sqs).unwrap();
        // level 0: 200 / 2, level 1: 100
        assert_eq!(estimate_time_ms(&sqs, &dag, StreamingStrategy::Hybrid, &config), 200);
    }

    #[test]
    fn test_estimate_bounds() {
        let config = PlannerConfig {
            base_cost_ms: 0,
            per_result_cost_ms: 0.0,
            max_estimate_ms: 1_000,
            ..PlannerConfig::default()
        };
        let sqs = vec![sq("a", &[], 1)];
        let dag = QueryDag::build(&sqs).unwrap();
        assert_eq!(estimate_time_ms(&sqs, &dag, StreamingStrategy::Sequential, &config), 1);

        let expensive = PlannerConfig {
            base_cost_ms: 10_000,
            max_estimate_ms: 1_000,
            ..PlannerConfig::default()
        };
        assert_eq!(
            estimate_time_ms(&sqs, &dag, StreamingStrategy::Sequential, &expensive),
            999
        );
    }
}
