use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    store::{ContactFields, Criterion},
    Error, Result,
};

/// Every `type` tag a step may carry.
pub const STEP_TYPES: &[&str] = &[
    "email",
    "timeBreak",
    "conditional",
    "split",
    "goto",
    "stop",
    "messenger",
    "createContact",
    "deleteContact",
    "findContact",
    "updateContact",
];

/// One executable unit of a workflow.
///
/// Steps are immutable once submitted. Conditional and split sub-paths are
/// cloned into the owning instance when they are taken, never shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    Email {
        to: String,
        #[serde(default)]
        subject: String,
        /// Inline HTML body, used when no template is referenced
        #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(
            default,
            rename = "template",
            alias = "templateRef",
            skip_serializing_if = "Option::is_none"
        )]
        template_ref: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TimeBreak {
        #[serde(rename = "duration", alias = "durationMs")]
        duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Conditional {
        #[serde(rename = "condition", alias = "conditionExpr")]
        condition_expr: String,
        #[serde(default)]
        true_path: Vec<Step>,
        #[serde(default)]
        false_path: Vec<Step>,
    },
    Split {
        paths: Vec<Vec<Step>>,
    },
    #[serde(rename_all = "camelCase")]
    Goto {
        target_index: usize,
    },
    Stop {},
    Messenger {
        message: String,
    },
    CreateContact {
        #[serde(rename = "data", alias = "fields")]
        fields: ContactFields,
    },
    DeleteContact {},
    FindContact {
        criteria: Vec<Criterion>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateContact {
        find_criteria: Vec<Criterion>,
        #[serde(default)]
        update_data: serde_json::Map<String, Value>,
    },
}

impl Step {
    /// The wire tag of this step.
    pub fn type_name(&self) -> &'static str {
        match self {
            Step::Email { .. } => "email",
            Step::TimeBreak { .. } => "timeBreak",
            Step::Conditional { .. } => "conditional",
            Step::Split { .. } => "split",
            Step::Goto { .. } => "goto",
            Step::Stop {} => "stop",
            Step::Messenger { .. } => "messenger",
            Step::CreateContact { .. } => "createContact",
            Step::DeleteContact {} => "deleteContact",
            Step::FindContact { .. } => "findContact",
            Step::UpdateContact { .. } => "updateContact",
        }
    }
}

/// Parse and validate a step list from an untyped JSON value.
///
/// Unknown `type` tags and negative goto targets are rejected here, at
/// submission, so a running instance never meets them.
pub fn parse_steps(mut value: Value) -> Result<Vec<Step>> {
    let items = value
        .as_array_mut()
        .ok_or_else(|| Error::Validation("workflow must be a list of steps".to_string()))?;
    for (idx, item) in items.iter_mut().enumerate() {
        hoist_update_data(item);
        validate_step_value(item, &format!("steps[{}]", idx))?;
    }
    serde_json::from_value(value).map_err(|e| Error::InvalidStep(e.to_string()))
}

/// `updateContact` may carry its fields inside a `data` object, the same
/// way `createContact` does. Flatten that form in place, nested paths too.
fn hoist_update_data(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    if obj.get("type").and_then(Value::as_str) == Some("updateContact")
        && !obj.contains_key("findCriteria")
    {
        if let Some(Value::Object(data)) = obj.remove("data") {
            for (key, field) in data {
                obj.entry(key).or_insert(field);
            }
        }
    }

    for branch in ["truePath", "falsePath"] {
        if let Some(Value::Array(path)) = obj.get_mut(branch) {
            path.iter_mut().for_each(hoist_update_data);
        }
    }
    if let Some(Value::Array(paths)) = obj.get_mut("paths") {
        for path in paths.iter_mut() {
            if let Value::Array(steps) = path {
                steps.iter_mut().for_each(hoist_update_data);
            }
        }
    }
}

/// Accept either a JSON array or a string containing one.
pub fn parse_workflow_payload(value: Value) -> Result<Vec<Step>> {
    match value {
        Value::String(raw) => parse_steps(serde_json::from_str(&raw)?),
        other => parse_steps(other),
    }
}

fn validate_step_value(value: &Value, location: &str) -> Result<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::InvalidStep(format!("{} is not an object", location)))?;

    let step_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::UnknownStepType(format!("{} has no type", location)))?;

    if !STEP_TYPES.contains(&step_type) {
        return Err(Error::UnknownStepType(format!("{} has type '{}'", location, step_type)));
    }

    match step_type {
        "goto" => match obj.get("targetIndex") {
            Some(Value::Number(n)) if n.as_u64().is_some() => {}
            Some(Value::Number(n)) => {
                return Err(Error::InvalidTarget(format!(
                    "{} targets index {}",
                    location, n
                )));
            }
            _ => {
                return Err(Error::InvalidTarget(format!(
                    "{} has no numeric targetIndex",
                    location
                )));
            }
        },
        "conditional" => {
            for branch in ["truePath", "falsePath"] {
                if let Some(path) = obj.get(branch) {
                    validate_path(path, &format!("{}.{}", location, branch))?;
                }
            }
        }
        "split" => {
            if let Some(Value::Array(paths)) = obj.get("paths") {
                for (idx, path) in paths.iter().enumerate() {
                    validate_path(path, &format!("{}.paths[{}]", location, idx))?;
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn validate_path(path: &Value, location: &str) -> Result<()> {
    let items = path
        .as_array()
        .ok_or_else(|| Error::InvalidStep(format!("{} is not a list", location)))?;
    for (idx, item) in items.iter().enumerate() {
        validate_step_value(item, &format!("{}[{}]", location, idx))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_original_field_names() {
        let steps = parse_steps(json!([
            { "type": "email", "to": "a@example.com", "subject": "Hi", "message": "<p>hi</p>" },
            { "type": "timeBreak", "duration": 100 },
            { "type": "goto", "targetIndex": 0 },
            { "type": "stop" }
        ]))
        .unwrap();

        assert_eq!(steps.len(), 4);
        assert_eq!(
            steps[0],
            Step::Email {
                to: "a@example.com".to_string(),
                subject: "Hi".to_string(),
                body: Some("<p>hi</p>".to_string()),
                template_ref: None,
            }
        );
        assert_eq!(steps[1], Step::TimeBreak { duration_ms: 100 });
        assert_eq!(steps[2], Step::Goto { target_index: 0 });
        assert_eq!(steps[3].type_name(), "stop");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = parse_steps(json!([{ "type": "fax", "to": "x" }])).unwrap_err();
        assert!(matches!(err, Error::UnknownStepType(_)));
    }

    #[test]
    fn test_unknown_type_in_nested_path_rejected() {
        let err = parse_steps(json!([{
            "type": "conditional",
            "condition": "event(\"a@example.com\", \"opened\")",
            "truePath": [{ "type": "teleport" }],
            "falsePath": []
        }]))
        .unwrap_err();
        assert!(matches!(err, Error::UnknownStepType(ref m) if m.contains("truePath[0]")));

        let err = parse_steps(json!([{
            "type": "split",
            "paths": [[{ "type": "stop" }], [{ "type": "goto", "targetIndex": -3 }]]
        }]))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
    }

    #[test]
    fn test_negative_goto_rejected() {
        let err = parse_steps(json!([{ "type": "goto", "targetIndex": -1 }])).unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(_)));
    }

    #[test]
    fn test_missing_fields_are_invalid_step() {
        let err = parse_steps(json!([{ "type": "timeBreak" }])).unwrap_err();
        assert!(matches!(err, Error::InvalidStep(_)));
    }

    #[test]
    fn test_payload_accepts_string_encoded_list() {
        let raw = json!("[{\"type\":\"messenger\",\"message\":\"hello\"}]");
        let steps = parse_workflow_payload(raw).unwrap();
        assert_eq!(steps, vec![Step::Messenger { message: "hello".to_string() }]);
    }

    #[test]
    fn test_contact_steps() {
        let steps = parse_steps(json!([
            { "type": "createContact", "data": { "name": "Ada", "email": "ada@example.com" } },
            { "type": "findContact", "criteria": [{ "field": "email", "value": "ada@example.com" }] },
            { "type": "updateContact",
              "findCriteria": [{ "key": "email", "value": "ada@example.com" }],
              "updateData": { "phone": "555", "plan": "pro" } },
            { "type": "deleteContact" }
        ]))
        .unwrap();

        match &steps[2] {
            Step::UpdateContact { find_criteria, update_data } => {
                assert_eq!(find_criteria[0].field, "email");
                assert_eq!(update_data["plan"], "pro");
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_update_contact_accepts_data_wrapper() {
        let steps = parse_steps(json!([
            { "type": "updateContact",
              "data": {
                  "findCriteria": [{ "field": "email", "value": "ada@example.com" }],
                  "updateData": { "plan": "pro" }
              } },
            { "type": "split", "paths": [[
                { "type": "updateContact",
                  "data": { "findCriteria": [{ "key": "name", "value": "Ada" }] } }
            ]] }
        ]))
        .unwrap();

        assert_eq!(
            steps[0],
            Step::UpdateContact {
                find_criteria: vec![Criterion::new("email", "ada@example.com")],
                update_data: json!({ "plan": "pro" }).as_object().cloned().unwrap(),
            }
        );
        match &steps[1] {
            Step::Split { paths } => match &paths[0][0] {
                Step::UpdateContact { find_criteria, update_data } => {
                    assert_eq!(find_criteria[0].field, "name");
                    assert!(update_data.is_empty());
                }
                other => panic!("unexpected step {:?}", other),
            },
            other => panic!("unexpected step {:?}", other),
        }
    }
}
