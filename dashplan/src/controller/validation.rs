//! Parameter validation against a data source's declared schema.

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

use crate::registry::{ParamSpec, ParamType};

#[derive(Debug, Clone, PartialEq)]
pub enum ParamProblem {
    Missing,
    WrongType { expected: &'static str },
    InvalidDate(String),
    ReversedRange { start: NaiveDate, end: NaiveDate },
    NotInEnum { options: Vec<String> },
}

/// One parameter that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamIssue {
    pub name: String,
    pub problem: ParamProblem,
    pub user_resolvable: bool,
    pub prompt: Option<String>,
}

impl ParamIssue {
    /// Human-readable sentence, suitable for a clarification question.
    pub fn describe(&self) -> String {
        if let (ParamProblem::Missing, Some(prompt)) = (&self.problem, &self.prompt) {
            return prompt.clone();
        }
        match &self.problem {
            ParamProblem::Missing => format!("Please provide a value for '{}'.", self.name),
            ParamProblem::WrongType { expected } => {
                format!("'{}' must be a {}.", self.name, expected)
            }
            ParamProblem::InvalidDate(raw) => format!(
                "'{}' has an invalid date '{}'; use YYYY-MM-DD.",
                self.name, raw
            ),
            ParamProblem::ReversedRange { start, end } => format!(
                "'{}' starts on {} which is after its end {}.",
                self.name, start, end
            ),
            ParamProblem::NotInEnum { options } => format!(
                "'{}' must be one of: {}.",
                self.name,
                options.join(", ")
            ),
        }
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

fn parse_date_value(value: Option<&Value>) -> Result<NaiveDate, ParamProblem> {
    match value {
        Some(Value::String(s)) => parse_date(s).ok_or_else(|| ParamProblem::InvalidDate(s.clone())),
        Some(other) => Err(ParamProblem::InvalidDate(other.to_string())),
        None => Err(ParamProblem::WrongType {
            expected: "date range with start and end",
        }),
    }
}

/// Accepts `{start, end}`, `"start..end"` or `"start/end"`.
pub fn parse_date_range(value: &Value) -> Result<(NaiveDate, NaiveDate), ParamProblem> {
    let (start, end) = match value {
        Value::Object(obj) => (
            parse_date_value(obj.get("start"))?,
            parse_date_value(obj.get("end"))?,
        ),
        Value::String(s) => {
            let (a, b) = s
                .split_once("..")
                .or_else(|| s.split_once('/'))
                .ok_or(ParamProblem::WrongType {
                    expected: "date range like 2024-01-01..2024-12-31",
                })?;
            let start = parse_date(a).ok_or_else(|| ParamProblem::InvalidDate(a.trim().into()))?;
            let end = parse_date(b).ok_or_else(|| ParamProblem::InvalidDate(b.trim().into()))?;
            (start, end)
        }
        _ => {
            return Err(ParamProblem::WrongType {
                expected: "date range",
            })
        }
    };
    if start > end {
        return Err(ParamProblem::ReversedRange { start, end });
    }
    Ok((start, end))
}

fn check_value(param_type: &ParamType, value: &Value) -> Result<(), ParamProblem> {
    match param_type {
        ParamType::Number if value.is_number() => Ok(()),
        ParamType::Number => Err(ParamProblem::WrongType { expected: "number" }),
        ParamType::String if value.is_string() => Ok(()),
        ParamType::String => Err(ParamProblem::WrongType { expected: "string" }),
        ParamType::Boolean if value.is_boolean() => Ok(()),
        ParamType::Boolean => Err(ParamProblem::WrongType { expected: "boolean" }),
        ParamType::Date => match value {
            Value::String(s) => parse_date(s)
                .map(|_| ())
                .ok_or_else(|| ParamProblem::InvalidDate(s.clone())),
            _ => Err(ParamProblem::WrongType { expected: "date" }),
        },
        ParamType::DateRange => parse_date_range(value).map(|_| ()),
        ParamType::Enum { options } => {
            let matches = value
                .as_str()
                .map(|s| options.iter().any(|o| o == s))
                .unwrap_or(false);
            if matches {
                Ok(())
            } else {
                Err(ParamProblem::NotInEnum {
                    options: options.clone(),
                })
            }
        }
    }
}

/// Check `params` against `schema`. Parameters not in the schema pass through.
pub fn validate_params(schema: &[ParamSpec], params: &Map<String, Value>) -> Vec<ParamIssue> {
    schema
        .iter()
        .filter_map(|spec| {
            let problem = match params.get(&spec.name) {
                None | Some(Value::Null) if spec.required => ParamProblem::Missing,
                None | Some(Value::Null) => return None,
                Some(value) => check_value(&spec.param_type, value).err()?,
            };
            Some(ParamIssue {
                name: spec.name.clone(),
                problem,
                user_resolvable: spec.user_resolvable,
                prompt: spec.prompt.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_dates() {
        assert!(parse_date("2024-02-29").is_some());
        assert!(parse_date("2023-02-29").is_none());
        assert_eq!(
            parse_date("2024-03-01T10:00:00-03:00"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert!(parse_date("01/03/2024").is_none());
    }

    #[test]
    fn test_date_range_forms() {
        assert!(parse_date_range(&json!("2024-01-01..2024-06-30")).is_ok());
        assert!(parse_date_range(&json!("2024-01-01/2024-06-30")).is_ok());
        assert!(parse_date_range(&json!({"start": "2024-01-01", "end": "2024-01-01"})).is_ok());
        assert!(matches!(
            parse_date_range(&json!("2024-06-30..2024-01-01")),
            Err(ParamProblem::ReversedRange { .. })
        ));
        assert!(matches!(
            parse_date_range(&json!({"start": "2024-01-01"})),
            Err(ParamProblem::WrongType { .. })
        ));
    }

    #[test]
    fn test_schema_checks() {
        let schema = vec![
            ParamSpec::required("year", ParamType::Number),
            ParamSpec::optional("active", ParamType::Boolean),
            ParamSpec::required(
                "status",
                ParamType::Enum {
                    options: vec!["open".into(), "closed".into()],
                },
            )
            .with_prompt("Which status: open or closed?"),
            ParamSpec::optional("since", ParamType::Date).not_user_resolvable(),
        ];

        let ok = params(json!({"year": 2024, "status": "open", "extra": "ignored"}));
        assert!(validate_params(&schema, &ok).is_empty());

        let bad = params(json!({"year": "2024", "active": "yes", "since": "ontem"}));
        let issues = validate_params(&schema, &bad);
        let names: Vec<_> = issues.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["year", "active", "status", "since"]);
        assert_eq!(issues[2].describe(), "Which status: open or closed?");
        assert!(!issues[3].user_resolvable);
        assert_eq!(issues[0].problem, ParamProblem::WrongType { expected: "number" });
    }

    #[test]
    fn test_null_counts_as_missing() {
        let schema = vec![ParamSpec::required("company_id", ParamType::String)];
        let issues = validate_params(&schema, &params(json!({"company_id": null})));
        assert_eq!(issues[0].problem, ParamProblem::Missing);
        assert!(issues[0].describe().contains("company_id"));
    }

    #[test]
    fn test_enum_rejects_unknown() {
        let schema = vec![ParamSpec::optional(
            "region",
            ParamType::Enum {
                options: vec!["sul".into(), "norte".into()],
            },
        )];
        let issues = validate_params(&schema, &params(json!({"region": "leste"})));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].describe().contains("sul, norte"));
    }
}
