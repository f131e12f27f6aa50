use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    TrueFalse,
    Text,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "single_choice",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::Text => "text",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "single_choice" => Ok(QuestionType::SingleChoice),
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "true_false" => Ok(QuestionType::TrueFalse),
            "text" => Ok(QuestionType::Text),
            other => Err(Error::Internal(format!("Unknown question type '{}'", other))),
        }
    }

    /// Text answers are never evaluated automatically.
    pub fn is_auto_graded(&self) -> bool {
        !matches!(self, QuestionType::Text)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub exam_id: Uuid,
    pub question_text: String,
    pub question_type: String,
    pub sequence: i32,
    pub is_required: bool,
    pub question_media: Option<JsonValue>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,
    pub choice_text: String,
    pub is_correct: bool,
    pub sequence: i32,
    pub explanation: Option<String>,
}

/// A question with its choices, as currently defined in the bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub exam_id: Uuid,
    pub text: String,
    pub question_type: QuestionType,
    pub sequence: i32,
    pub is_required: bool,
    pub media: Option<JsonValue>,
    pub explanation: Option<String>,
    pub choices: Vec<Choice>,
}

impl Question {
    pub fn from_row(row: QuestionRow, mut choices: Vec<Choice>) -> Result<Self> {
        choices.sort_by_key(|c| (c.sequence, c.id));
        Ok(Self {
            id: row.id,
            exam_id: row.exam_id,
            text: row.question_text,
            question_type: QuestionType::parse(&row.question_type)?,
            sequence: row.sequence,
            is_required: row.is_required,
            media: row.question_media,
            explanation: row.explanation,
            choices,
        })
    }

    pub fn correct_choice_ids(&self) -> BTreeSet<i64> {
        self.choices
            .iter()
            .filter(|c| c.is_correct)
            .map(|c| c.id)
            .collect()
    }

    pub fn has_choice(&self, choice_id: i64) -> bool {
        self.choices.iter().any(|c| c.id == choice_id)
    }

    pub fn is_text(&self) -> bool {
        self.question_type == QuestionType::Text
    }
}
