//! Pattern library for intent decomposition
//!
//! A closed set of tagged pattern descriptors, evaluated in priority order.
//! Each descriptor owns a regex over the folded intent and the sub-query
//! templates it contributes. Listing templates come first; aggregation
//! templates depend on every listing contributed before them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::error::PlanError;
use crate::types::{Priority, SubQuery};

// ============================================================================
// Static Regexes - matched against folded (lowercase, no diacritics) text
// ============================================================================

static PATTERN_COURSES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:cursos?|courses?|trilhas?)\b").unwrap());

static PATTERN_ENROLLMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:matriculas?|inscricao|inscricoes|enrollments?|alunos?|students?)\b").unwrap()
});

static PATTERN_INSTRUCTORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:instrutor(?:es)?|professor(?:es)?|instructors?|teachers?)\b").unwrap()
});

static PATTERN_COMPANIES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:empresas?|companies|company|corporativ[oa]s?|enterprise)\b").unwrap()
});

static PATTERN_SALES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:vendas?|receita|faturamento|sales|revenue)\b").unwrap());

static PATTERN_METRICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:total|totais|media|soma|quantidade|quantos|quantas|contagem|count|average|sum|ranking|top|kpis?|indicadores|metricas|metrics)\b",
    )
    .unwrap()
});

static PATTERN_TRENDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:tendencias?|evolucao|historico|ao longo|trends?|over time|por mes|mensal|monthly)\b",
    )
    .unwrap()
});

// Filter extraction. Location runs against the original text to keep casing.
static FILTER_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(?:[Ee]m|[Nn][oa]|[Ii]n)\s+(\p{Lu}\p{L}*(?:\s+(?:d[eoa]s?\s+)?\p{Lu}\p{L}*)*)")
        .unwrap()
});

static FILTER_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap());

static FILTER_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:top|primeir[oa]s|first)\s+(\d{1,4})\b").unwrap());

static FILTER_COMPANY_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:company_id\s*[:=]\s*([a-z0-9_-]+)|(?:empresa|company)\s+(?:id\s*)?#?(\d+))\b")
        .unwrap()
});

/// Known pattern tags, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Courses,
    Enrollments,
    Instructors,
    Companies,
    Sales,
    Metrics,
    Trends,
}

/// Listing templates stand alone; aggregations consume listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateRole {
    Listing,
    Aggregation,
}

#[derive(Debug, Clone)]
pub struct SubQueryTemplate {
    pub id: &'static str,
    pub description: &'static str,
    pub data_source: &'static str,
    pub expected_results: u32,
    pub priority: Priority,
    pub role: TemplateRole,
}

pub struct PatternDescriptor {
    pub kind: PatternKind,
    matcher: &'static Lazy<Regex>,
    pub templates: &'static [SubQueryTemplate],
}

impl PatternDescriptor {
    pub fn matches(&self, folded_intent: &str) -> bool {
        self.matcher.is_match(folded_intent)
    }
}

impl std::fmt::Debug for PatternDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternDescriptor")
            .field("kind", &self.kind)
            .field("matcher", &self.matcher.as_str())
            .field("templates", &self.templates)
            .finish()
    }
}

const fn listing(
    id: &'static str,
    description: &'static str,
    data_source: &'static str,
    expected_results: u32,
    priority: Priority,
) -> SubQueryTemplate {
    SubQueryTemplate {
        id,
        description,
        data_source,
        expected_results,
        priority,
        role: TemplateRole::Listing,
    }
}

const fn aggregation(
    id: &'static str,
    description: &'static str,
    data_source: &'static str,
    expected_results: u32,
) -> SubQueryTemplate {
    SubQueryTemplate {
        id,
        description,
        data_source,
        expected_results,
        priority: Priority::Medium,
        role: TemplateRole::Aggregation,
    }
}

static KNOWN_PATTERNS: [PatternDescriptor; 7] = [
    PatternDescriptor {
        kind: PatternKind::Courses,
        matcher: &PATTERN_COURSES,
        templates: &[listing("sq_courses", "List courses", "courses", 50, Priority::High)],
    },
    PatternDescriptor {
        kind: PatternKind::Enrollments,
        matcher: &PATTERN_ENROLLMENTS,
        templates: &[listing(
            "sq_enrollments",
            "List enrollments",
            "enrollments",
            200,
            Priority::High,
        )],
    },
    PatternDescriptor {
        kind: PatternKind::Instructors,
        matcher: &PATTERN_INSTRUCTORS,
        templates: &[listing(
            "sq_instructors",
            "List instructors",
            "instructors",
            30,
            Priority::Medium,
        )],
    },
    PatternDescriptor {
        kind: PatternKind::Companies,
        matcher: &PATTERN_COMPANIES,
        templates: &[listing(
            "sq_companies",
            "List company accounts",
            "enterprise.companies",
            20,
            Priority::Medium,
        )],
    },
    PatternDescriptor {
        kind: PatternKind::Sales,
        matcher: &PATTERN_SALES,
        templates: &[listing("sq_sales", "List sales", "sales", 100, Priority::High)],
    },
    PatternDescriptor {
        kind: PatternKind::Metrics,
        matcher: &PATTERN_METRICS,
        templates: &[aggregation(
            "sq_metrics",
            "Aggregate key metrics",
            "analytics.metrics",
            10,
        )],
    },
    PatternDescriptor {
        kind: PatternKind::Trends,
        matcher: &PATTERN_TRENDS,
        templates: &[aggregation(
            "sq_trends",
            "Aggregate trends over time",
            "analytics.timeseries",
            24,
        )],
    },
];

/// The pattern registry in evaluation order.
pub fn known_patterns() -> &'static [PatternDescriptor] {
    &KNOWN_PATTERNS
}

/// Check registry invariants: template ids are unique and non-empty.
pub fn validate_registry(patterns: &[PatternDescriptor]) -> Result<(), PlanError> {
    let mut seen = HashSet::new();
    for pattern in patterns {
        if pattern.templates.is_empty() {
            return Err(PlanError::CorruptPatternRegistry(format!(
                "pattern {:?} has no templates",
                pattern.kind
            )));
        }
        for template in pattern.templates {
            if template.id.is_empty() || !seen.insert(template.id) {
                return Err(PlanError::CorruptPatternRegistry(format!(
                    "template id '{}' is empty or duplicated",
                    template.id
                )));
            }
        }
    }
    Ok(())
}

/// First listing data source mentioned by the intent, if any.
pub fn infer_data_source(folded_intent: &str) -> Option<&'static str> {
    known_patterns()
        .iter()
        .filter(|p| p.matches(folded_intent))
        .flat_map(|p| p.templates.iter())
        .find(|t| t.role == TemplateRole::Listing)
        .map(|t| t.data_source)
}

/// Run every pattern against the intent and instantiate matching templates.
///
/// Returns an empty list when nothing matches.
pub fn decompose(
    patterns: &[PatternDescriptor],
    folded_intent: &str,
    filters: &Map<String, Value>,
) -> Vec<SubQuery> {
    let mut sub_queries = Vec::new();
    let mut listing_ids: Vec<String> = Vec::new();

    for pattern in patterns.iter().filter(|p| p.matches(folded_intent)) {
        for template in pattern.templates {
            let mut sq = SubQuery::new(template.id, template.description, template.data_source)
                .with_expected_results(template.expected_results)
                .with_priority(template.priority);
            sq.filters = filters.clone();

            match template.role {
                TemplateRole::Listing => listing_ids.push(template.id.to_string()),
                TemplateRole::Aggregation => {
                    sq = sq.with_dependencies(listing_ids.iter().cloned());
                }
            }
            log::debug!("Pattern {:?} contributed sub-query {}", pattern.kind, sq.id);
            sub_queries.push(sq);
        }
    }

    sub_queries
}

/// Extract location, year, limit and company filters from the intent.
pub fn extract_filters(original_intent: &str, folded_intent: &str) -> Map<String, Value> {
    let mut filters = Map::new();

    if let Some(location) = FILTER_LOCATION
        .captures(original_intent)
        .and_then(|c| c.get(1))
    {
        filters.insert("location".into(), Value::String(location.as_str().trim().to_string()));
    }

    if let Some(year) = FILTER_YEAR
        .captures(folded_intent)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
    {
        filters.insert("year".into(), Value::from(year));
    }

    if let Some(limit) = FILTER_LIMIT
        .captures(folded_intent)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
    {
        filters.insert("limit".into(), Value::from(limit));
    }

    if let Some(company) = FILTER_COMPANY_ID
        .captures(folded_intent)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
    {
        filters.insert("company_id".into(), Value::String(company.as_str().to_string()));
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::corpus::fold_text;
    use serde_json::json;

    fn run(intent: &str) -> Vec<SubQuery> {
        let folded = fold_text(intent);
        let filters = extract_filters(intent, &folded);
        decompose(known_patterns(), &folded, &filters)
    }

    #[test]
    fn test_registry_is_valid() {
        assert!(validate_registry(known_patterns()).is_ok());
    }

    #[test]
    fn test_courses_with_location() {
        let sqs = run("dashboard de cursos em São Paulo");
        assert_eq!(sqs.len(), 1);
        assert_eq!(sqs[0].id, "sq_courses");
        assert_eq!(sqs[0].filters.get("location"), Some(&json!("São Paulo")));
        assert!(sqs[0].depends_on.is_empty());
    }

    #[test]
    fn test_aggregation_depends_on_listings() {
        let sqs = run("total de matrículas por curso");
        let ids: Vec<_> = sqs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["sq_courses", "sq_enrollments", "sq_metrics"]);
        assert_eq!(sqs[2].depends_on, vec!["sq_courses", "sq_enrollments"]);
    }

    #[test]
    fn test_aggregation_without_listing_has_no_deps() {
        let sqs = run("ranking mensal");
        let ids: Vec<_> = sqs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["sq_metrics", "sq_trends"]);
        assert!(sqs.iter().all(|s| s.depends_on.is_empty()));
    }

    #[test]
    fn test_no_match() {
        assert!(run("mostre algo interessante").is_empty());
    }

    #[test]
    fn test_extract_year_limit_company() {
        let intent = "top 10 vendas da empresa 42 em 2024";
        let filters = extract_filters(intent, &fold_text(intent));
        assert_eq!(filters.get("limit"), Some(&json!(10)));
        assert_eq!(filters.get("year"), Some(&json!(2024)));
        assert_eq!(filters.get("company_id"), Some(&json!("42")));
    }

    #[test]
    fn test_location_requires_capitalized_name() {
        let intent = "cursos em alta";
        assert!(extract_filters(intent, &fold_text(intent)).get("location").is_none());
        let intent = "sales in Rio de Janeiro";
        assert_eq!(
            extract_filters(intent, &fold_text(intent)).get("location"),
            Some(&json!("Rio de Janeiro"))
        );
    }

    #[test]
    fn test_infer_data_source() {
        assert_eq!(infer_data_source("qual e o nome do primeiro curso?"), Some("courses"));
        assert_eq!(infer_data_source("ranking"), None);
    }
}
