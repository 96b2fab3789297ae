use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The four assessment slots carried on every student record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExamField {
    #[serde(rename = "UT1")]
    Ut1,
    #[serde(rename = "CAT1")]
    Cat1,
    #[serde(rename = "UT2")]
    Ut2,
    #[serde(rename = "CAT2")]
    Cat2,
}

impl ExamField {
    pub const ALL: [ExamField; 4] = [ExamField::Ut1, ExamField::Cat1, ExamField::Ut2, ExamField::Cat2];

    pub fn label(&self) -> &'static str {
        match self {
            ExamField::Ut1 => "UT1",
            ExamField::Cat1 => "CAT1",
            ExamField::Ut2 => "UT2",
            ExamField::Cat2 => "CAT2",
        }
    }

    /// Name of the parallel per-question field, e.g. `UT1_breakdown`
    pub fn breakdown_key(&self) -> String {
        format!("{}_breakdown", self.label())
    }
}

impl fmt::Display for ExamField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ExamField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "UT1" => Ok(ExamField::Ut1),
            "CAT1" => Ok(ExamField::Cat1),
            "UT2" => Ok(ExamField::Ut2),
            "CAT2" => Ok(ExamField::Cat2),
            other => Err(anyhow::anyhow!("Unknown exam field '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question: String,
    #[serde(default, deserialize_with = "deserialize_marks")]
    pub marks: i64,
    #[serde(default, alias = "feedback")]
    pub comment: String,
}

impl QuestionRecord {
    pub fn new(question: impl Into<String>, marks: i64, comment: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            marks,
            comment: comment.into(),
        }
    }
}

/// Marks arrive from edit forms as numbers or strings; anything unreadable counts as zero
fn deserialize_marks<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => lenient_integer(&s),
        _ => 0,
    })
}

/// Leading-digit integer parse that never fails: `"7 marks"` is 7, `"abc"` is 0
pub fn lenient_integer(text: &str) -> i64 {
    let trimmed = text.trim();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed),
    };
    let run: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
    run.parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

/// Transient aggregate produced by parsing one grading response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingResult {
    pub total: i64,
    pub breakdown: Vec<QuestionRecord>,
}

impl GradingResult {
    pub fn empty() -> Self {
        Self {
            total: 0,
            breakdown: Vec::new(),
        }
    }
}

/// Result of scanning model output for `<question> - <marks>` pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParseOutcome {
    Parsed { records: Vec<QuestionRecord>, total: i64 },
    Unparsed { raw_text: String },
}

impl ParseOutcome {
    /// Fail-open projection: text that could not be parsed grades as zero
    pub fn into_result(self) -> GradingResult {
        match self {
            ParseOutcome::Parsed { records, total } => GradingResult {
                total,
                breakdown: records,
            },
            ParseOutcome::Unparsed { .. } => GradingResult::empty(),
        }
    }

    pub fn needs_manual_review(&self) -> bool {
        matches!(self, ParseOutcome::Unparsed { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    #[serde(rename = "registerNo")]
    pub register_no: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(rename = "UT1")]
    pub ut1: Option<i64>,
    #[serde(rename = "CAT1")]
    pub cat1: Option<i64>,
    #[serde(rename = "UT2")]
    pub ut2: Option<i64>,
    #[serde(rename = "CAT2")]
    pub cat2: Option<i64>,
    #[serde(rename = "UT1_breakdown", default)]
    pub ut1_breakdown: Vec<QuestionRecord>,
    #[serde(rename = "CAT1_breakdown", default)]
    pub cat1_breakdown: Vec<QuestionRecord>,
    #[serde(rename = "UT2_breakdown", default)]
    pub ut2_breakdown: Vec<QuestionRecord>,
    #[serde(rename = "CAT2_breakdown", default)]
    pub cat2_breakdown: Vec<QuestionRecord>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    pub fn total(&self, exam: ExamField) -> Option<i64> {
        match exam {
            ExamField::Ut1 => self.ut1,
            ExamField::Cat1 => self.cat1,
            ExamField::Ut2 => self.ut2,
            ExamField::Cat2 => self.cat2,
        }
    }

    pub fn breakdown(&self, exam: ExamField) -> &[QuestionRecord] {
        match exam {
            ExamField::Ut1 => &self.ut1_breakdown,
            ExamField::Cat1 => &self.cat1_breakdown,
            ExamField::Ut2 => &self.ut2_breakdown,
            ExamField::Cat2 => &self.cat2_breakdown,
        }
    }

    /// Scores as sent to the feedback prompt; ungraded exams count as zero
    pub fn exam_scores(&self) -> ExamScores {
        ExamScores {
            ut1: self.ut1.unwrap_or(0),
            cat1: self.cat1.unwrap_or(0),
            ut2: self.ut2.unwrap_or(0),
            cat2: self.cat2.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStudentRequest {
    #[serde(rename = "registerNo")]
    pub register_no: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
}

/// Persistable outcome of the save cycle for one exam slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamUpdate {
    pub exam: ExamField,
    pub total: i64,
    pub breakdown: Vec<QuestionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveBreakdownRequest {
    pub breakdown: Vec<QuestionRecord>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamScores {
    #[serde(rename = "UT1", default, deserialize_with = "deserialize_marks")]
    pub ut1: i64,
    #[serde(rename = "CAT1", default, deserialize_with = "deserialize_marks")]
    pub cat1: i64,
    #[serde(rename = "UT2", default, deserialize_with = "deserialize_marks")]
    pub ut2: i64,
    #[serde(rename = "CAT2", default, deserialize_with = "deserialize_marks")]
    pub cat2: i64,
}

impl ExamScores {
    pub fn entries(&self) -> [(ExamField, i64); 4] {
        [
            (ExamField::Ut1, self.ut1),
            (ExamField::Cat1, self.cat1),
            (ExamField::Ut2, self.ut2),
            (ExamField::Cat2, self.cat2),
        ]
    }
}

// Wire shapes for the upload endpoints

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeWithKeyRequest {
    #[serde(default)]
    pub pdf: Option<String>,
    #[serde(rename = "keyData", default)]
    pub key_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractKeyRequest {
    #[serde(default)]
    pub pdf: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub scores: Option<ExamScores>,
}

/// `{ response }` on success, `{ error }` otherwise
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TextResponse {
    Response { response: String },
    Error { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FeedbackResponse {
    Feedback { feedback: FeedbackMap },
    Error { error: String },
}

/// Exam label to feedback text, in the order labels first appeared
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackMap {
    entries: Vec<(String, String)>,
}

impl FeedbackMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later inserts for an existing label replace its text in place
    pub fn insert(&mut self, label: String, text: String) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == label) {
            Some(entry) => entry.1 = text,
            None => self.entries.push((label, text)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, text)| text.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, t)| (l.as_str(), t.as_str()))
    }
}

impl Serialize for FeedbackMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, text) in &self.entries {
            map.serialize_entry(label, text)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeedbackMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FeedbackMapVisitor;

        impl<'de> serde::de::Visitor<'de> for FeedbackMapVisitor {
            type Value = FeedbackMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of exam labels to feedback text")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut map = FeedbackMap::new();
                while let Some((label, text)) = access.next_entry::<String, String>()? {
                    map.insert(label, text);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(FeedbackMapVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamFeedback {
    pub exam: String,
    pub feedback: String,
}

/// Unsaved draft returned after grading an uploaded answer sheet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedDraft {
    pub student_id: Uuid,
    pub exam: ExamField,
    pub outcome: ParseOutcome,
    pub total: i64,
    pub breakdown: Vec<QuestionRecord>,
    pub needs_manual_review: bool,
    pub used_default_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentMarks {
    pub name: String,
    pub marks: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentBreakdown {
    pub name: String,
    pub exam: ExamField,
    pub breakdown: Vec<QuestionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(anyhow::anyhow!("Unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub classes: Vec<String>,
    pub register_no: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub classes: Vec<String>,
    pub register_no: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_marks_accept_numeric_strings() {
        let record: QuestionRecord =
            serde_json::from_value(json!({"question": "3", "marks": "7"})).unwrap();
        assert_eq!(record.marks, 7);
        assert_eq!(record.comment, "");

        let record: QuestionRecord =
            serde_json::from_value(json!({"question": "3", "marks": "abc"})).unwrap();
        assert_eq!(record.marks, 0);

        let record: QuestionRecord = serde_json::from_value(json!({"question": "3"})).unwrap();
        assert_eq!(record.marks, 0);
    }

    #[test]
    fn test_feedback_alias_for_comment() {
        let record: QuestionRecord = serde_json::from_value(
            json!({"question": "1", "marks": 5, "feedback": "show working"}),
        )
        .unwrap();
        assert_eq!(record.comment, "show working");
    }

    #[test]
    fn test_lenient_integer() {
        assert_eq!(lenient_integer("12"), 12);
        assert_eq!(lenient_integer(" 8 marks"), 8);
        assert_eq!(lenient_integer("N/A"), 0);
        assert_eq!(lenient_integer(""), 0);
        assert_eq!(lenient_integer("-3"), -3);
    }

    #[test]
    fn test_exam_field_parsing() {
        assert_eq!("UT1".parse::<ExamField>().unwrap(), ExamField::Ut1);
        assert_eq!("cat2".parse::<ExamField>().unwrap(), ExamField::Cat2);
        assert!("MIDTERM".parse::<ExamField>().is_err());
        assert_eq!(ExamField::Cat1.breakdown_key(), "CAT1_breakdown");
    }

    #[test]
    fn test_unparsed_outcome_fails_open() {
        let outcome = ParseOutcome::Unparsed {
            raw_text: "No response received".to_string(),
        };
        assert!(outcome.needs_manual_review());
        assert_eq!(outcome.into_result(), GradingResult::empty());
    }

    #[test]
    fn test_feedback_map_last_write_wins() {
        let mut map = FeedbackMap::new();
        map.insert("UT1".to_string(), "first".to_string());
        map.insert("CAT1".to_string(), "other".to_string());
        map.insert("UT1".to_string(), "second".to_string());

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("UT1"), Some("second"));
        let labels: Vec<&str> = map.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["UT1", "CAT1"]);

        let value = serde_json::to_value(&map).unwrap();
        assert_eq!(value, json!({"UT1": "second", "CAT1": "other"}));
    }
}
