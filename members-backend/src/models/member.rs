use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// A club member as stored in the `bookClub` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: i64,
    pub name: String,
    #[serde(serialize_with = "self::serialize_age")]
    pub age: f64,
    /// File name of the avatar inside the uploads directory
    pub avatar: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a member. The avatar comes from the file
/// intake, never from the caller.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub name: String,
    pub age: f64,
    pub avatar: String,
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Default, PartialEq)]
pub struct UpdateMemberRequest {
    pub name: Option<String>,
    pub age: Option<f64>,
}

/// One or more member fields failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Member validation failed: {}", .problems.join(", "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl ValidationError {
    pub fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }

    fn from_problems(problems: Vec<String>) -> Result<(), Self> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Self { problems })
        }
    }
}

/// Whole ages go out as JSON integers so `30` reads back as `30`
fn serialize_age<S>(age: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if age.fract() == 0.0 && age.abs() <= MAX_EXACT {
        serializer.serialize_i64(*age as i64)
    } else {
        serializer.serialize_f64(*age)
    }
}

impl NewMember {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut problems = Vec::new();
        if self.name.is_empty() {
            problems.push("name is required".to_string());
        }
        if !self.age.is_finite() {
            problems.push("age must be a finite number".to_string());
        }
        if self.avatar.is_empty() {
            problems.push("avatar is required".to_string());
        }
        ValidationError::from_problems(problems)
    }
}

impl UpdateMemberRequest {
    /// Cast a JSON body into an update. `null` counts as absent and unknown
    /// keys are ignored.
    pub fn from_json(body: &Value) -> Result<Self, ValidationError> {
        let Some(fields) = body.as_object() else {
            return Err(ValidationError::single("update body must be a JSON object"));
        };

        let mut problems = Vec::new();
        let name = match fields.get("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Some(v.to_string()),
            Some(other) => {
                problems.push(format!("name must be text, got {}", other));
                None
            }
        };
        let age = match fields.get("age") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => match parse_age(s) {
                Ok(age) => Some(age),
                Err(e) => {
                    problems.extend(e.problems);
                    None
                }
            },
            Some(other) => {
                problems.push(format!("age must be a number, got {}", other));
                None
            }
        };

        ValidationError::from_problems(problems)?;
        Ok(Self { name, age })
    }

    /// Cast urlencoded form fields into an update
    pub fn from_form(fields: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let age = fields.get("age").map(|raw| parse_age(raw)).transpose()?;
        Ok(Self {
            name: fields.get("name").cloned(),
            age,
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut problems = Vec::new();
        if self.name.as_deref() == Some("") {
            problems.push("name is required".to_string());
        }
        if self.age.is_some_and(|age| !age.is_finite()) {
            problems.push("age must be a finite number".to_string());
        }
        ValidationError::from_problems(problems)
    }
}

/// Parse a path identifier into a store row id.
///
/// Only plain ASCII digits naming a positive `i64` are accepted, so signs,
/// whitespace and overflow are all treated as malformed.
pub fn parse_member_id(raw: &str) -> Option<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<i64>().ok().filter(|id| *id > 0)
}

/// Parse a textual `age` field. Any finite decimal number is accepted.
pub fn parse_age(raw: &str) -> Result<f64, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::single("age is required"));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|age| age.is_finite())
        .ok_or_else(|| ValidationError::single(format!("age must be a number, got \"{}\"", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_member_id() {
        assert_eq!(parse_member_id("1"), Some(1));
        assert_eq!(parse_member_id("42"), Some(42));
        assert_eq!(parse_member_id("007"), Some(7));

        assert_eq!(parse_member_id(""), None);
        assert_eq!(parse_member_id("0"), None);
        assert_eq!(parse_member_id("-3"), None);
        assert_eq!(parse_member_id("+3"), None);
        assert_eq!(parse_member_id(" 3"), None);
        assert_eq!(parse_member_id("not-a-valid-id"), None);
        assert_eq!(parse_member_id("99999999999999999999"), None);
    }

    #[test]
    fn test_parse_age() {
        assert_eq!(parse_age("30"), Ok(30.0));
        assert_eq!(parse_age(" 30 "), Ok(30.0));
        assert_eq!(parse_age("30.5"), Ok(30.5));
        assert_eq!(
            parse_age(""),
            Err(ValidationError::single("age is required"))
        );
        let err = parse_age("thirty").unwrap_err();
        assert!(err.to_string().contains("age must be a number"));
        assert!(parse_age("inf").is_err());
        assert!(parse_age("NaN").is_err());
    }

    #[test]
    fn test_new_member_validation_collects_all_problems() {
        let member = NewMember {
            name: String::new(),
            age: 30.0,
            avatar: String::new(),
        };
        let err = member.validate().unwrap_err();
        assert_eq!(err.problems.len(), 2);
        assert_eq!(
            err.to_string(),
            "Member validation failed: name is required, avatar is required"
        );
    }

    #[test]
    fn test_update_validation() {
        assert!(UpdateMemberRequest::default().validate().is_ok());

        let blank_name = UpdateMemberRequest {
            name: Some(String::new()),
            age: None,
        };
        assert!(blank_name.validate().is_err());

        let age_only = UpdateMemberRequest {
            name: None,
            age: Some(31.0),
        };
        assert!(age_only.validate().is_ok());
    }

    #[test]
    fn test_update_from_json_casts_loose_values() {
        let request = UpdateMemberRequest::from_json(&json!({
            "name": 5,
            "age": "31",
            "avatar": "elsewhere.png"
        }))
        .expect("cast");
        assert_eq!(
            request,
            UpdateMemberRequest {
                name: Some("5".to_string()),
                age: Some(31.0),
            }
        );

        let fractional = UpdateMemberRequest::from_json(&json!({ "age": 30.5 })).expect("cast");
        assert_eq!(fractional.age, Some(30.5));

        let nulls = UpdateMemberRequest::from_json(&json!({ "name": null, "age": null }))
            .expect("cast");
        assert_eq!(nulls, UpdateMemberRequest::default());
    }

    #[test]
    fn test_update_from_json_rejects_uncastable_values() {
        let err = UpdateMemberRequest::from_json(&json!({ "age": "abc" })).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Member validation failed: age must be a number, got \"abc\""
        );

        let err = UpdateMemberRequest::from_json(&json!({ "name": ["a"], "age": true }))
            .unwrap_err();
        assert_eq!(err.problems.len(), 2);

        assert!(UpdateMemberRequest::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_update_from_form() {
        let fields = HashMap::from([
            ("name".to_string(), "Alicia".to_string()),
            ("age".to_string(), "40.25".to_string()),
        ]);
        let request = UpdateMemberRequest::from_form(&fields).expect("cast");
        assert_eq!(request.name.as_deref(), Some("Alicia"));
        assert_eq!(request.age, Some(40.25));

        let fields = HashMap::from([("age".to_string(), "old".to_string())]);
        assert!(UpdateMemberRequest::from_form(&fields).is_err());
    }

    #[test]
    fn test_member_serializes_camel_case() {
        let now = Utc::now();
        let member = Member {
            id: 1,
            name: "Alice".to_string(),
            age: 30.0,
            avatar: "avatar-1700000000000.jpg".to_string(),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&member).unwrap();
        assert_eq!(json["name"], "Alice");
        assert_eq!(json["age"], 30);
        assert!(json["age"].is_i64());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("created_at").is_none());

        let fractional = Member { age: 30.5, ..member };
        assert_eq!(serde_json::to_value(&fractional).unwrap()["age"], 30.5);
    }
}
