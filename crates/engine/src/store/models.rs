use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::{Error, Result};

// Contact records managed by workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub workflow_id: Option<String>,
    pub attributes: Map<String, JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity fields accepted by an upsert. `email` is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFields {
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl ContactFields {
    /// Trimmed, lowercased email and empty strings folded to `None`.
    pub fn normalized(self) -> Result<Self> {
        let email = normalize_email(&self.email);
        if email.is_empty() {
            return Err(Error::Validation("contact email is required".to_string()));
        }
        Ok(Self {
            name: non_empty(self.name),
            email,
            phone: non_empty(self.phone),
        })
    }
}

/// One `field = value` match used to look up contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(alias = "key")]
    pub field: String,
    pub value: String,
}

impl Criterion {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Columns a criterion may match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactColumn {
    Name,
    Email,
    Phone,
    WorkflowId,
}

impl ContactColumn {
    pub fn parse(field: &str) -> Result<Self> {
        match field {
            "name" => Ok(ContactColumn::Name),
            "email" => Ok(ContactColumn::Email),
            "phone" => Ok(ContactColumn::Phone),
            "workflowId" | "workflow_id" => Ok(ContactColumn::WorkflowId),
            other => Err(Error::Validation(format!(
                "cannot search contacts by '{}'",
                other
            ))),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            ContactColumn::Name => "name",
            ContactColumn::Email => "email",
            ContactColumn::Phone => "phone",
            ContactColumn::WorkflowId => "workflow_id",
        }
    }
}

/// Build `col1 = <p1> AND col2 = <p2>` with backend-specific placeholders.
pub(crate) fn criteria_clause(
    criteria: &[Criterion],
    placeholder: impl Fn(usize) -> String,
) -> Result<(String, Vec<String>)> {
    if criteria.is_empty() {
        return Err(Error::Validation("at least one search criterion is required".to_string()));
    }

    let mut clauses = Vec::with_capacity(criteria.len());
    let mut values = Vec::with_capacity(criteria.len());
    for (idx, criterion) in criteria.iter().enumerate() {
        let column = ContactColumn::parse(&criterion.field)?;
        clauses.push(format!("{} = {}", column.column(), placeholder(idx + 1)));
        values.push(match column {
            ContactColumn::Email => normalize_email(&criterion.value),
            _ => criterion.value.clone(),
        });
    }
    Ok((clauses.join(" AND "), values))
}

/// Apply an update patch: known columns are overwritten, every other key is
/// merged into `attributes`.
pub(crate) fn apply_patch(contact: &mut Contact, patch: &Map<String, JsonValue>) -> Result<()> {
    for (key, value) in patch {
        match key.as_str() {
            "name" => contact.name = value_as_string(value),
            "phone" => contact.phone = value_as_string(value),
            "email" => {
                let email = value_as_string(value)
                    .map(|e| normalize_email(&e))
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| Error::Validation("contact email cannot be empty".to_string()))?;
                contact.email = email;
            }
            _ => {
                contact.attributes.insert(key.clone(), value.clone());
            }
        }
    }
    contact.updated_at = Utc::now();
    Ok(())
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn value_as_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => non_empty(Some(s.clone())),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contact() -> Contact {
        Contact {
            id: Uuid::new_v4(),
            name: Some("Ada".to_string()),
            email: "ada@example.com".to_string(),
            phone: None,
            workflow_id: None,
            attributes: Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_criteria_clause_uses_whitelisted_columns() {
        let (clause, values) = criteria_clause(
            &[Criterion::new("email", " Ada@Example.com"), Criterion::new("workflowId", "7")],
            |i| format!("${}", i),
        )
        .unwrap();
        assert_eq!(clause, "email = $1 AND workflow_id = $2");
        assert_eq!(values, vec!["ada@example.com", "7"]);
    }

    #[test]
    fn test_criteria_clause_rejects_unknown_fields() {
        let err = criteria_clause(&[Criterion::new("1=1; DROP TABLE contacts", "x")], |_| "?".into())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(criteria_clause(&[], |_| "?".into()).is_err());
    }

    #[test]
    fn test_apply_patch_merges_attributes() {
        let mut c = contact();
        let patch = json!({ "phone": "555-0100", "plan": "pro", "seats": 3 });
        apply_patch(&mut c, patch.as_object().unwrap()).unwrap();
        assert_eq!(c.phone.as_deref(), Some("555-0100"));
        assert_eq!(c.attributes["plan"], "pro");
        assert_eq!(c.attributes["seats"], 3);
        assert_eq!(c.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_apply_patch_rejects_empty_email() {
        let mut c = contact();
        let patch = json!({ "email": "  " });
        assert!(apply_patch(&mut c, patch.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_fields_normalized() {
        let fields = ContactFields {
            name: Some("".to_string()),
            email: " ADA@example.com ".to_string(),
            phone: Some("555".to_string()),
        }
        .normalized()
        .unwrap();
        assert_eq!(fields.email, "ada@example.com");
        assert_eq!(fields.name, None);
        assert_eq!(fields.phone.as_deref(), Some("555"));
    }
}
