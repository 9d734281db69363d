// Transition selection
//
// Pure and synchronous: given the candidates leaving the current state, keep
// the ones whose criteria hold against the payload and trigger context.

use serde_json::Value;

use crate::errors::CriteriaError;
use crate::workflow::Transition;

/// Criteria of `transition` could not be evaluated
#[derive(Debug)]
pub struct SelectionError<'d> {
    pub transition: &'d Transition,
    pub error: CriteriaError,
}

/// Result of evaluating every candidate
#[derive(Debug)]
pub struct Selection<'d> {
    qualifying: Vec<&'d Transition>,
}

impl<'d> Selection<'d> {
    /// First qualifying transition in declaration order
    pub fn chosen(&self) -> Option<&'d Transition> {
        self.qualifying.first().copied()
    }

    /// Qualifying transitions passed over in favour of [`Selection::chosen`]
    pub fn passed_over(&self) -> &[&'d Transition] {
        self.qualifying.get(1..).unwrap_or(&[])
    }

    pub fn is_ambiguous(&self) -> bool {
        self.qualifying.len() > 1
    }

    pub fn qualifying(&self) -> &[&'d Transition] {
        &self.qualifying
    }
}

pub fn criteria_hold(
    transition: &Transition,
    payload: &Value,
    trigger: &Value,
) -> Result<bool, CriteriaError> {
    match &transition.criteria {
        Some(predicate) => predicate.evaluate(payload, trigger),
        None => Ok(true),
    }
}

/// Evaluate `candidates` in order; the first criteria error aborts selection
pub fn select<'d>(
    candidates: impl IntoIterator<Item = &'d Transition>,
    payload: &Value,
    trigger: &Value,
) -> Result<Selection<'d>, SelectionError<'d>> {
    let mut qualifying = Vec::new();
    for transition in candidates {
        match criteria_hold(transition, payload, trigger) {
            Ok(true) => qualifying.push(transition),
            Ok(false) => {}
            Err(error) => return Err(SelectionError { transition, error }),
        }
    }
    Ok(Selection { qualifying })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Predicate, StateId, StateTable};
    use proptest::prelude::*;
    use serde_json::json;

    fn threshold_transition(name: &str, states: &mut StateTable, threshold: i64) -> Transition {
        let predicate: Predicate = serde_json::from_value(json!({
            "type": "simple", "jsonPath": "$.score", "operation": "GREATER_OR_EQUAL", "value": threshold
        }))
        .unwrap();
        Transition {
            name: name.to_string(),
            description: String::new(),
            start: StateId::NONE,
            end: states.intern(name, ""),
            automated: true,
            criteria: Some(predicate),
            processor: None,
            schedule_transition_processors: Vec::new(),
            had_processes: false,
        }
    }

    #[test]
    fn test_no_candidates_is_quiescent() {
        let selection = select(std::iter::empty::<&Transition>(), &json!({}), &Value::Null).unwrap();
        assert!(selection.chosen().is_none());
        assert!(!selection.is_ambiguous());
    }

    #[test]
    fn test_criteria_error_names_transition() {
        let mut states = StateTable::new();
        let t = threshold_transition("check", &mut states, 3);
        let err = select([&t], &json!({"score": [1]}), &Value::Null).unwrap_err();
        assert_eq!(err.transition.name, "check");
    }

    proptest! {
        #[test]
        fn prop_chosen_is_first_qualifying(
            thresholds in prop::collection::vec(-50i64..50, 0..8),
            score in -60i64..60,
        ) {
            let mut states = StateTable::new();
            let transitions: Vec<Transition> = thresholds
                .iter()
                .enumerate()
                .map(|(i, t)| threshold_transition(&format!("t{i}"), &mut states, *t))
                .collect();
            let payload = json!({"score": score});
            let selection = select(transitions.iter(), &payload, &Value::Null).unwrap();

            let expected = thresholds.iter().position(|t| score >= *t);
            prop_assert_eq!(
                selection.chosen().map(|t| t.name.clone()),
                expected.map(|i| format!("t{i}"))
            );
            for t in selection.qualifying() {
                prop_assert!(criteria_hold(t, &payload, &Value::Null).unwrap());
            }
            let qualifying_count = thresholds.iter().filter(|t| score >= **t).count();
            prop_assert_eq!(selection.is_ambiguous(), qualifying_count > 1);
        }
    }
}
