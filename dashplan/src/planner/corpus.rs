//! Weighted keyword corpus and complexity classification.
//!
//! Intent text and keywords are compared after case folding and removal of
//! Latin diacritics, on whole-word boundaries. Multi-word keywords match a
//! contiguous run of words.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::Complexity;

/// Keyword sets by weight. Loadable from the `[planner.corpus]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordCorpus {
    /// Any single match classifies the intent as High
    pub high: Vec<String>,
    /// Aggregation and shaping words
    pub medium: Vec<String>,
    /// Entity nouns; they count toward the total match threshold only
    #[serde(default)]
    pub entity: Vec<String>,
}

impl KeywordCorpus {
    /// Built-in corpus, Portuguese first with English equivalents.
    ///
    /// `todos`/`todas` sit in the high tier, so plain listing requests
    /// ("todos os cursos") classify High.
    pub fn builtin() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|w| w.to_string()).collect()
        }

        Self {
            high: words(&[
                "dashboard",
                "painel",
                "todos",
                "todas",
                "visão geral",
                "overview",
                "relatório completo",
                "full report",
                "comparativo",
                "comparar",
                "compare",
                "análise completa",
            ]),
            medium: words(&[
                "total",
                "totais",
                "média",
                "soma",
                "quantidade",
                "quantos",
                "quantas",
                "contagem",
                "count",
                "average",
                "sum",
                "ranking",
                "top",
                "gráfico",
                "chart",
                "tendência",
                "trend",
                "evolução",
                "distribuição",
                "agrupado",
                "agrupar",
                "por mês",
                "por estado",
                "por cidade",
                "métricas",
                "metrics",
                "kpi",
                "kpis",
                "indicadores",
            ]),
            entity: words(&[
                "curso",
                "cursos",
                "course",
                "courses",
                "matrícula",
                "matrículas",
                "enrollment",
                "enrollments",
                "aluno",
                "alunos",
                "student",
                "students",
                "empresa",
                "empresas",
                "company",
                "companies",
                "venda",
                "vendas",
                "sales",
                "receita",
                "revenue",
                "instrutor",
                "instrutores",
                "instructor",
                "instructors",
            ]),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.high.is_empty() && self.medium.is_empty() {
            return Err("corpus needs at least one high or medium keyword".to_string());
        }
        let blank = self
            .high
            .iter()
            .chain(&self.medium)
            .chain(&self.entity)
            .any(|kw| tokenize(&fold_text(kw)).is_empty());
        if blank {
            return Err("corpus contains a keyword with no letters or digits".to_string());
        }
        Ok(())
    }
}

impl Default for KeywordCorpus {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Lowercase and strip Latin diacritics ("São Paulo" -> "sao paulo").
///
/// Handles both precomposed letters and decomposed input where the accent
/// is a separate combining mark.
pub fn fold_text(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| !is_combining_mark(*c))
        .map(fold_char)
        .collect()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}')
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

fn tokenize(folded: &str) -> Vec<&str> {
    folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Which keywords matched, per tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationSignals {
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub entity: Vec<String>,
}

impl ClassificationSignals {
    pub fn total(&self) -> usize {
        self.high.len() + self.medium.len() + self.entity.len()
    }
}

#[derive(Debug, Clone)]
struct Keyword {
    label: String,
    tokens: Vec<String>,
}

impl Keyword {
    fn new(raw: &str) -> Self {
        let folded = fold_text(raw);
        Self {
            label: folded.clone(),
            tokens: tokenize(&folded).into_iter().map(str::to_string).collect(),
        }
    }

    fn matches(&self, words: &[&str]) -> bool {
        if self.tokens.is_empty() || self.tokens.len() > words.len() {
            return false;
        }
        words
            .windows(self.tokens.len())
            .any(|window| window.iter().zip(&self.tokens).all(|(w, t)| *w == t))
    }
}

/// Compiled corpus plus thresholds.
#[derive(Debug, Clone)]
pub struct ComplexityClassifier {
    high: Vec<Keyword>,
    medium: Vec<Keyword>,
    entity: Vec<Keyword>,
    high_match_threshold: usize,
    medium_match_threshold: usize,
}

impl ComplexityClassifier {
    pub fn new(
        corpus: &KeywordCorpus,
        high_match_threshold: usize,
        medium_match_threshold: usize,
    ) -> Self {
        let compile =
            |list: &[String]| -> Vec<Keyword> { list.iter().map(|kw| Keyword::new(kw)).collect() };
        Self {
            high: compile(&corpus.high),
            medium: compile(&corpus.medium),
            entity: compile(&corpus.entity),
            high_match_threshold,
            medium_match_threshold,
        }
    }

    /// Collect distinct keyword matches for every tier.
    pub fn signals(&self, intent: &str) -> ClassificationSignals {
        let folded = fold_text(intent);
        let words = tokenize(&folded);
        let collect = |keywords: &[Keyword]| -> Vec<String> {
            keywords
                .iter()
                .filter(|kw| kw.matches(&words))
                .map(|kw| kw.label.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        ClassificationSignals {
            high: collect(&self.high),
            medium: collect(&self.medium),
            entity: collect(&self.entity),
        }
    }

    /// Reaching a threshold exactly promotes to the higher bucket.
    pub fn classify(&self, intent: &str) -> (Complexity, ClassificationSignals) {
        let signals = self.signals(intent);
        let complexity = if !signals.high.is_empty()
            || (self.high_match_threshold > 0 && signals.total() >= self.high_match_threshold)
        {
            Complexity::High
        } else if self.medium_match_threshold > 0
            && signals.medium.len() >= self.medium_match_threshold
        {
            Complexity::Medium
        } else {
            Complexity::Low
        };
        (complexity, signals)
    }
}

impl Default for ComplexityClassifier {
    fn default() -> Self {
        Self::new(&KeywordCorpus::builtin(), 4, 1)
    }
}
