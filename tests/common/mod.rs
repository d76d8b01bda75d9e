#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value as JsonValue;
use tower::ServiceExt;
use uuid::Uuid;

use exam_backend::database::MemoryStore;
use exam_backend::middleware::auth::{issue_token, Role};
use exam_backend::models::allocation::TestAllocation;
use exam_backend::models::question::{Question, QuestionType, Subject, Topic};
use exam_backend::models::test::{Test, TestQuestion};
use exam_backend::utils::time::ManualClock;
use exam_backend::AppState;

pub const JWT_SECRET: &str = "test_secret_key";
pub const IST_MINUTES: i32 = 330;

/// 10:00 IST on the exam day.
pub fn exam_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 4, 30, 0).unwrap()
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub state: AppState,
    pub test: Test,
    /// Kinematics question keyed "A", then Optics question keyed "B". One mark each.
    pub questions: Vec<Question>,
}

impl Fixture {
    pub fn new(configure: impl FnOnce(&mut Test)) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(exam_day()));

        let subject = Subject {
            id: Uuid::new_v4(),
            name: "Physics".into(),
        };
        let kinematics = Topic {
            id: Uuid::new_v4(),
            subject_id: Some(subject.id),
            name: "Kinematics".into(),
        };
        let optics = Topic {
            id: Uuid::new_v4(),
            subject_id: Some(subject.id),
            name: "Optics".into(),
        };

        let mut test = Test {
            id: Uuid::new_v4(),
            subject_id: Some(subject.id),
            title: "Physics Unit Test".into(),
            description: Some("Chapters 1-3".into()),
            duration_minutes: 60,
            passing_marks: 1,
            allow_late_submission: false,
            shuffle_questions: false,
            show_results_immediately: true,
            created_at: exam_day() - Duration::days(7),
        };
        configure(&mut test);

        let questions = vec![
            question(Some(kinematics.id), "Unit of velocity?", "A", "m/s is distance over time"),
            question(Some(optics.id), "Speed of light is constant in?", "B", "Vacuum"),
        ];

        store.insert_subject(subject).unwrap();
        store.insert_topic(kinematics).unwrap();
        store.insert_topic(optics).unwrap();
        store.insert_test(test.clone()).unwrap();
        for (i, q) in questions.iter().enumerate() {
            store.insert_question(q.clone()).unwrap();
            store
                .insert_test_question(TestQuestion {
                    id: Uuid::new_v4(),
                    test_id: test.id,
                    question_id: q.id,
                    question_order: i as i32 + 1,
                    marks: 1,
                })
                .unwrap();
        }

        let state = AppState::new(
            store.clone(),
            clock.clone(),
            JWT_SECRET.to_string(),
            IST_MINUTES,
        );

        Self {
            store,
            clock,
            state,
            test,
            questions,
        }
    }

    /// Allocates the test to one student over `[start, end]`.
    pub async fn allocate(
        &self,
        student_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TestAllocation {
        let outcome = self
            .state
            .allocation_service
            .allocate(self.test.id, &[student_id], start, end, None)
            .await
            .expect("allocate");
        outcome.allocated.into_iter().next().expect("one allocation")
    }

    /// Window that opened ten minutes ago and closes in three hours.
    pub async fn allocate_open(&self, student_id: Uuid) -> TestAllocation {
        let now = exam_day();
        self.allocate(student_id, now - Duration::minutes(10), now + Duration::hours(3))
            .await
    }

    pub fn add_question(&self, correct: &str) -> Question {
        let q = question(None, "Added later", correct, "");
        self.store.insert_question(q.clone()).unwrap();
        self.store
            .insert_test_question(TestQuestion {
                id: Uuid::new_v4(),
                test_id: self.test.id,
                question_id: q.id,
                question_order: 99,
                marks: 1,
            })
            .unwrap();
        q
    }

    pub fn router(&self) -> Router {
        exam_backend::routes::router(self.state.clone())
    }
}

pub fn question(topic_id: Option<Uuid>, text: &str, correct: &str, explanation: &str) -> Question {
    Question {
        id: Uuid::new_v4(),
        topic_id,
        question_type: QuestionType::Mcq,
        question_text: text.into(),
        option_a: Some("first".into()),
        option_b: Some("second".into()),
        option_c: Some("third".into()),
        option_d: Some("fourth".into()),
        correct_answer: correct.into(),
        explanation: (!explanation.is_empty()).then(|| explanation.to_string()),
        marks: 1,
    }
}

pub fn token(user_id: Uuid, role: Role) -> String {
    issue_token(JWT_SECRET, user_id, role, Duration::hours(1)).expect("token")
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, json)
}
