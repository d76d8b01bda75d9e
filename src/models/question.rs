use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "question_type", rename_all = "snake_case")]
pub enum QuestionType {
    Mcq,
    TrueFalse,
    McqWithAllOfAbove,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub topic_id: Option<Uuid>,
    pub question_type: QuestionType,
    pub question_text: String,
    pub option_a: Option<String>,
    pub option_b: Option<String>,
    pub option_c: Option<String>,
    pub option_d: Option<String>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub marks: i32,
}

impl Question {
    /// Non-empty options in letter order.
    pub fn options(&self) -> Vec<(char, &str)> {
        [
            ('A', &self.option_a),
            ('B', &self.option_b),
            ('C', &self.option_c),
            ('D', &self.option_d),
        ]
        .into_iter()
        .filter_map(|(letter, text)| {
            text.as_deref()
                .filter(|t| !t.trim().is_empty())
                .map(|t| (letter, t))
        })
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Topic {
    pub id: Uuid,
    pub subject_id: Option<Uuid>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
}
