// Transition criteria: predicates over an entity payload and its trigger context

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::errors::CriteriaError;

const PAYLOAD_ROOT: &str = "$";
const TRIGGER_ROOT: &str = "$trigger";

/// A criteria predicate as declared on a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Predicate {
    Simple(SimpleCondition),
    Group(GroupCondition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleCondition {
    #[serde(rename = "jsonPath")]
    pub json_path: JsonPath,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCondition {
    pub operator: GroupOperator,
    pub conditions: Vec<Predicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Equals,
    NotEqual,
    IsNull,
    NotNull,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    StartsWith,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOperator {
    And,
    Or,
    Not,
}

impl Operation {
    fn needs_value(self) -> bool {
        !matches!(self, Operation::IsNull | Operation::NotNull)
    }

    fn as_str(self) -> &'static str {
        match self {
            Operation::Equals => "EQUALS",
            Operation::NotEqual => "NOT_EQUAL",
            Operation::IsNull => "IS_NULL",
            Operation::NotNull => "NOT_NULL",
            Operation::GreaterThan => "GREATER_THAN",
            Operation::GreaterOrEqual => "GREATER_OR_EQUAL",
            Operation::LessThan => "LESS_THAN",
            Operation::LessOrEqual => "LESS_OR_EQUAL",
            Operation::Contains => "CONTAINS",
            Operation::StartsWith => "STARTS_WITH",
            Operation::In => "IN",
        }
    }
}

/// Where a path is rooted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathRoot {
    Payload,
    Trigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<(PathRoot, Vec<Segment>), String> {
    let (root, rest) = if let Some(rest) = path.strip_prefix(TRIGGER_ROOT) {
        (PathRoot::Trigger, rest)
    } else if let Some(rest) = path.strip_prefix(PAYLOAD_ROOT) {
        (PathRoot::Payload, rest)
    } else {
        return Err(format!("path '{path}' must start with '$.' or '$trigger.'"));
    };

    if rest.is_empty() {
        return Ok((root, Vec::new()));
    }
    let rest = rest
        .strip_prefix('.')
        .ok_or_else(|| format!("path '{path}' has no '.' after its root"))?;

    let mut segments = Vec::new();
    for part in rest.split('.') {
        let (key, mut indexes) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if key.is_empty() && indexes.is_empty() {
            return Err(format!("path '{path}' has an empty segment"));
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        }
        while !indexes.is_empty() {
            let close = indexes
                .find(']')
                .ok_or_else(|| format!("path '{path}' has an unclosed index"))?;
            let index = indexes[1..close]
                .parse::<usize>()
                .map_err(|_| format!("path '{path}' has a non-numeric index"))?;
            segments.push(Segment::Index(index));
            indexes = &indexes[close + 1..];
            if !indexes.is_empty() && !indexes.starts_with('[') {
                return Err(format!("path '{path}' has trailing characters after an index"));
            }
        }
    }
    Ok((root, segments))
}

/// A `$.a.b[0]` or `$trigger.kind` path, parsed when the criteria is loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    raw: String,
    root: PathRoot,
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn resolve<'a>(&self, payload: &'a Value, trigger: &'a Value) -> Option<&'a Value> {
        let source = match self.root {
            PathRoot::Payload => payload,
            PathRoot::Trigger => trigger,
        };
        self.segments
            .iter()
            .try_fold(source, |current, segment| match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(index) => current.get(*index),
            })
    }
}

impl TryFrom<String> for JsonPath {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (root, segments) = parse_path(&raw)?;
        Ok(Self {
            raw,
            root,
            segments,
        })
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.raw
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Predicate {
    /// Structural check run once when the workflow is loaded
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Predicate::Simple(condition) => {
                if condition.operation.needs_value() && condition.value.is_none() {
                    return Err(format!(
                        "operation {} on '{}' requires a value",
                        condition.operation.as_str(),
                        condition.json_path
                    ));
                }
                match (condition.operation, &condition.value) {
                    (Operation::In, Some(value)) if !value.is_array() => {
                        Err(format!("IN on '{}' requires an array value", condition.json_path))
                    }
                    (Operation::StartsWith, Some(value)) if !value.is_string() => Err(format!(
                        "STARTS_WITH on '{}' requires a string value",
                        condition.json_path
                    )),
                    _ => Ok(()),
                }
            }
            Predicate::Group(group) => {
                match group.operator {
                    GroupOperator::Not if group.conditions.len() != 1 => {
                        return Err("NOT takes exactly one condition".to_string())
                    }
                    GroupOperator::And | GroupOperator::Or if group.conditions.is_empty() => {
                        return Err("AND/OR group has no conditions".to_string())
                    }
                    _ => {}
                }
                group.conditions.iter().try_for_each(Predicate::validate)
            }
        }
    }

    /// Evaluate against the entity payload and the trigger context value
    pub fn evaluate(&self, payload: &Value, trigger: &Value) -> Result<bool, CriteriaError> {
        match self {
            Predicate::Simple(condition) => condition.evaluate(payload, trigger),
            Predicate::Group(group) => match group.operator {
                GroupOperator::And => {
                    for condition in &group.conditions {
                        if !condition.evaluate(payload, trigger)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                GroupOperator::Or => {
                    for condition in &group.conditions {
                        if condition.evaluate(payload, trigger)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                GroupOperator::Not => match group.conditions.first() {
                    Some(condition) => Ok(!condition.evaluate(payload, trigger)?),
                    None => Ok(true),
                },
            },
        }
    }
}

impl SimpleCondition {
    fn error(&self, reason: impl Into<String>) -> CriteriaError {
        CriteriaError {
            path: self.json_path.to_string(),
            operation: self.operation.as_str().to_string(),
            reason: reason.into(),
        }
    }

    fn evaluate(&self, payload: &Value, trigger: &Value) -> Result<bool, CriteriaError> {
        let actual = self
            .json_path
            .resolve(payload, trigger)
            .filter(|v| !v.is_null());
        let expected = self.value.as_ref();

        match self.operation {
            Operation::IsNull => Ok(actual.is_none()),
            Operation::NotNull => Ok(actual.is_some()),
            Operation::Equals => Ok(loosely_equal(actual, expected)),
            Operation::NotEqual => Ok(!loosely_equal(actual, expected)),
            Operation::GreaterThan
            | Operation::GreaterOrEqual
            | Operation::LessThan
            | Operation::LessOrEqual => {
                let (Some(actual), Some(expected)) = (actual, expected) else {
                    return Ok(false);
                };
                let ordering = compare(actual, expected).ok_or_else(|| {
                    self.error(format!("cannot order {actual} against {expected}"))
                })?;
                Ok(match self.operation {
                    Operation::GreaterThan => ordering == Ordering::Greater,
                    Operation::GreaterOrEqual => ordering != Ordering::Less,
                    Operation::LessThan => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                })
            }
            Operation::Contains => match (actual, expected) {
                (None, _) => Ok(false),
                (Some(Value::String(haystack)), Some(Value::String(needle))) => {
                    Ok(haystack.contains(needle.as_str()))
                }
                (Some(Value::Array(items)), Some(needle)) => {
                    Ok(items.iter().any(|item| loosely_equal(Some(item), Some(needle))))
                }
                (Some(other), _) => Err(self.error(format!("cannot search inside {other}"))),
            },
            Operation::StartsWith => match (actual, expected) {
                (None, _) => Ok(false),
                (Some(Value::String(text)), Some(Value::String(prefix))) => {
                    Ok(text.starts_with(prefix.as_str()))
                }
                (Some(other), _) => Err(self.error(format!("{other} is not a string"))),
            },
            Operation::In => match expected {
                Some(Value::Array(options)) => {
                    Ok(options.iter().any(|option| loosely_equal(actual, Some(option))))
                }
                _ => Err(self.error("IN requires an array value")),
            },
        }
    }
}

fn loosely_equal(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match (actual, expected) {
        (None, None) | (None, Some(Value::Null)) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn predicate(value: Value) -> Predicate {
        let predicate: Predicate = serde_json::from_value(value).unwrap();
        predicate.validate().unwrap();
        predicate
    }

    #[test]
    fn test_simple_equals_on_nested_path() {
        let p = predicate(json!({
            "type": "simple", "jsonPath": "$.request.country", "operation": "EQUALS", "value": "FI"
        }));
        let payload = json!({"request": {"country": "FI"}});
        assert!(p.evaluate(&payload, &Value::Null).unwrap());
        assert!(!p.evaluate(&json!({}), &Value::Null).unwrap());
    }

    #[test]
    fn test_array_index_and_numeric_comparison() {
        let p = predicate(json!({
            "type": "simple", "jsonPath": "$.results[1].score", "operation": "GREATER_OR_EQUAL", "value": 10
        }));
        let payload = json!({"results": [{"score": 1}, {"score": 10.0}]});
        assert!(p.evaluate(&payload, &Value::Null).unwrap());
    }

    #[test]
    fn test_trigger_root_is_visible() {
        let p = predicate(json!({
            "type": "simple", "jsonPath": "$trigger.kind", "operation": "EQUALS", "value": "SCHEDULED"
        }));
        assert!(p.evaluate(&json!({}), &json!({"kind": "SCHEDULED"})).unwrap());
    }

    #[test]
    fn test_group_operators() {
        let p = predicate(json!({
            "type": "group",
            "operator": "AND",
            "conditions": [
                {"type": "simple", "jsonPath": "$.status", "operation": "IN", "value": ["active", "pending"]},
                {"type": "group", "operator": "NOT", "conditions": [
                    {"type": "simple", "jsonPath": "$.error", "operation": "NOT_NULL"}
                ]}
            ]
        }));
        assert!(p.evaluate(&json!({"status": "active"}), &Value::Null).unwrap());
        assert!(!p.evaluate(&json!({"status": "active", "error": "boom"}), &Value::Null).unwrap());
        assert!(!p.evaluate(&json!({"status": "closed"}), &Value::Null).unwrap());
    }

    #[test]
    fn test_ordering_incompatible_types_is_an_error() {
        let p = predicate(json!({
            "type": "simple", "jsonPath": "$.count", "operation": "LESS_THAN", "value": 3
        }));
        let err = p.evaluate(&json!({"count": {"nested": true}}), &Value::Null).unwrap_err();
        assert_eq!(err.operation, "LESS_THAN");
        assert_eq!(err.path, "$.count");
    }

    #[test]
    fn test_missing_value_is_rejected_at_validation() {
        let p: Predicate = serde_json::from_value(json!({
            "type": "simple", "jsonPath": "$.a", "operation": "EQUALS"
        }))
        .unwrap();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_path_is_parsed_when_deserialized() {
        let err = serde_json::from_value::<Predicate>(json!({
            "type": "simple", "jsonPath": "status", "operation": "NOT_NULL"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("must start with"));

        let p = predicate(json!({
            "type": "simple", "jsonPath": "$trigger.source.id", "operation": "NOT_NULL"
        }));
        let Predicate::Simple(condition) = &p else {
            panic!("expected a simple condition");
        };
        assert_eq!(condition.json_path.root, PathRoot::Trigger);
        assert_eq!(
            condition.json_path.segments,
            vec![Segment::Key("source".to_string()), Segment::Key("id".to_string())]
        );
        assert_eq!(
            serde_json::to_value(&p).unwrap()["jsonPath"],
            json!("$trigger.source.id")
        );
    }

    #[test]
    fn test_bad_paths_are_rejected() {
        assert!(parse_path("status").is_err());
        assert!(parse_path("$.items[x]").is_err());
        assert!(parse_path("$..a").is_err());
        assert_eq!(
            parse_path("$.items[2]").unwrap().1,
            vec![Segment::Key("items".to_string()), Segment::Index(2)]
        );
    }
}
