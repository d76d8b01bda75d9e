use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::database::ExamStore;
use crate::error::{Error, Result};
use crate::models::answer::StudentAnswer;
use crate::models::test_result::TestResult;
use crate::services::grading_service::GradingService;

/// Bucket name for answers or results whose topic or subject can't be resolved.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicPerformance {
    pub topic_name: String,
    pub questions_attempted: i32,
    pub correct_answers: i32,
    pub wrong_answers: i32,
    pub marks_obtained: i32,
    pub total_marks: i32,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectPerformance {
    pub subject_name: String,
    pub tests_count: i32,
    pub total_marks_obtained: i32,
    pub total_max_marks: i32,
    pub average_percentage: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultBreakdown {
    pub topics: Vec<TopicPerformance>,
    pub subjects: Vec<SubjectPerformance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentReport {
    pub student_id: Uuid,
    pub tests_taken: i32,
    pub tests_passed: i32,
    pub tests_failed: i32,
    pub average_percentage: Decimal,
    pub total_marks_obtained: i32,
    pub total_max_marks: i32,
    pub topics: Vec<TopicPerformance>,
    pub subjects: Vec<SubjectPerformance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestSummary {
    pub test_id: Uuid,
    pub title: String,
    pub total_allocated: i64,
    pub total_completed: i64,
    pub total_pending: i64,
    pub pass_count: i32,
    pub fail_count: i32,
    pub average_score: Decimal,
    pub average_percentage: Decimal,
    pub highest_score: i32,
    pub lowest_score: i32,
    pub topics: Vec<TopicPerformance>,
}

/// One answer reduced to what the topic grouping needs.
#[derive(Debug, Clone)]
pub struct AnswerFact {
    pub topic: Option<String>,
    pub attempted: bool,
    pub is_correct: bool,
    pub marks_obtained: i32,
    pub max_marks: i32,
}

/// Groups answers by topic. Buckets come back sorted by name.
pub fn topic_breakdown(facts: impl IntoIterator<Item = AnswerFact>) -> Vec<TopicPerformance> {
    let mut buckets: BTreeMap<String, TopicPerformance> = BTreeMap::new();
    for fact in facts {
        let name = fact.topic.unwrap_or_else(|| UNKNOWN.to_string());
        let bucket = buckets.entry(name.clone()).or_insert_with(|| TopicPerformance {
            topic_name: name,
            questions_attempted: 0,
            correct_answers: 0,
            wrong_answers: 0,
            marks_obtained: 0,
            total_marks: 0,
            percentage: Decimal::ZERO,
        });
        if fact.attempted {
            bucket.questions_attempted += 1;
        }
        if fact.is_correct {
            bucket.correct_answers += 1;
        }
        bucket.marks_obtained += fact.marks_obtained;
        bucket.total_marks += fact.max_marks;
    }

    buckets
        .into_values()
        .map(|mut bucket| {
            bucket.wrong_answers = (bucket.questions_attempted - bucket.correct_answers).max(0);
            bucket.percentage = GradingService::percentage(bucket.marks_obtained, bucket.total_marks);
            bucket
        })
        .collect()
}

/// Groups final results by the subject of their test.
pub fn subject_breakdown<'a>(
    results: impl IntoIterator<Item = (Option<String>, &'a TestResult)>,
) -> Vec<SubjectPerformance> {
    let mut buckets: BTreeMap<String, SubjectPerformance> = BTreeMap::new();
    for (subject, result) in results {
        let name = subject.unwrap_or_else(|| UNKNOWN.to_string());
        let bucket = buckets.entry(name.clone()).or_insert_with(|| SubjectPerformance {
            subject_name: name,
            tests_count: 0,
            total_marks_obtained: 0,
            total_max_marks: 0,
            average_percentage: Decimal::ZERO,
        });
        bucket.tests_count += 1;
        bucket.total_marks_obtained += result.obtained_marks;
        bucket.total_max_marks += result.total_marks;
    }

    buckets
        .into_values()
        .map(|mut bucket| {
            bucket.average_percentage =
                GradingService::percentage(bucket.total_marks_obtained, bucket.total_max_marks);
            bucket
        })
        .collect()
}

fn mean(values: impl IntoIterator<Item = Decimal>) -> Decimal {
    let (sum, count) = values
        .into_iter()
        .fold((Decimal::ZERO, 0u32), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        Decimal::ZERO
    } else {
        (sum / Decimal::from(count)).round_dp(2)
    }
}

/// Id-keyed lookups for the rows a set of results refers to.
struct Lookup {
    slot_marks: HashMap<(Uuid, Uuid), i32>,
    question_marks: HashMap<Uuid, i32>,
    question_topic: HashMap<Uuid, String>,
    test_subject: HashMap<Uuid, String>,
}

impl Lookup {
    fn fact(&self, test_id: Uuid, answer: &StudentAnswer) -> AnswerFact {
        let max_marks = self
            .slot_marks
            .get(&(test_id, answer.question_id))
            .or_else(|| self.question_marks.get(&answer.question_id))
            .copied()
            .unwrap_or(0);
        AnswerFact {
            topic: self.question_topic.get(&answer.question_id).cloned(),
            attempted: answer.given_answer().is_some(),
            is_correct: answer.is_correct,
            marks_obtained: answer.marks_obtained,
            max_marks,
        }
    }
}

#[derive(Clone)]
pub struct ProjectionService {
    store: Arc<dyn ExamStore>,
}

impl ProjectionService {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        Self { store }
    }

    pub async fn result_breakdown(&self, result: &TestResult) -> Result<ResultBreakdown> {
        let results = std::slice::from_ref(result);
        let (topics, subjects) = self.breakdowns(results).await?;
        Ok(ResultBreakdown { topics, subjects })
    }

    pub async fn student_report(&self, student_id: Uuid) -> Result<StudentReport> {
        let results: Vec<TestResult> = self
            .store
            .list_results_for_student(student_id)
            .await?
            .into_iter()
            .filter(TestResult::is_final)
            .collect();

        let (topics, subjects) = self.breakdowns(&results).await?;
        let passed = results.iter().filter(|r| r.is_passed).count() as i32;

        Ok(StudentReport {
            student_id,
            tests_taken: results.len() as i32,
            tests_passed: passed,
            tests_failed: results.len() as i32 - passed,
            average_percentage: mean(results.iter().map(|r| r.percentage)),
            total_marks_obtained: results.iter().map(|r| r.obtained_marks).sum(),
            total_max_marks: results.iter().map(|r| r.total_marks).sum(),
            topics,
            subjects,
        })
    }

    pub async fn test_summary(&self, test_id: Uuid) -> Result<TestSummary> {
        let test = self
            .store
            .get_test(test_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Test {} not found", test_id)))?;
        let total_allocated = self.store.count_allocations_for_test(test_id).await?;
        let results: Vec<TestResult> = self
            .store
            .list_results_for_test(test_id)
            .await?
            .into_iter()
            .filter(TestResult::is_final)
            .collect();

        let (topics, _) = self.breakdowns(&results).await?;
        let completed = results.len() as i64;
        let passed = results.iter().filter(|r| r.is_passed).count() as i32;

        Ok(TestSummary {
            test_id,
            title: test.title,
            total_allocated,
            total_completed: completed,
            total_pending: (total_allocated - completed).max(0),
            pass_count: passed,
            fail_count: results.len() as i32 - passed,
            average_score: mean(results.iter().map(|r| Decimal::from(r.obtained_marks))),
            average_percentage: mean(results.iter().map(|r| r.percentage)),
            highest_score: results.iter().map(|r| r.obtained_marks).max().unwrap_or(0),
            lowest_score: results.iter().map(|r| r.obtained_marks).min().unwrap_or(0),
            topics,
        })
    }

    async fn breakdowns(
        &self,
        results: &[TestResult],
    ) -> Result<(Vec<TopicPerformance>, Vec<SubjectPerformance>)> {
        if results.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let result_ids: Vec<Uuid> = results.iter().map(|r| r.id).collect();
        let answers = self.store.list_answers(&result_ids).await?;
        let lookup = self.lookup(results, &answers).await?;

        let test_of_result: HashMap<Uuid, Uuid> =
            results.iter().map(|r| (r.id, r.test_id)).collect();
        let facts = answers.iter().filter_map(|answer| {
            let test_id = test_of_result.get(&answer.result_id)?;
            Some(lookup.fact(*test_id, answer))
        });
        let topics = topic_breakdown(facts);
        let subjects = subject_breakdown(
            results
                .iter()
                .map(|r| (lookup.test_subject.get(&r.test_id).cloned(), r)),
        );
        Ok((topics, subjects))
    }

    async fn lookup(&self, results: &[TestResult], answers: &[StudentAnswer]) -> Result<Lookup> {
        let test_ids: Vec<Uuid> = results
            .iter()
            .map(|r| r.test_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let mut slot_marks = HashMap::new();
        for test_id in &test_ids {
            for slot in self.store.list_test_questions(*test_id).await? {
                slot_marks.insert((slot.test_id, slot.question_id), slot.marks);
            }
        }

        let question_ids: Vec<Uuid> = answers
            .iter()
            .map(|a| a.question_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let questions = self.store.list_questions(&question_ids).await?;
        let topic_ids: Vec<Uuid> = questions.iter().filter_map(|q| q.topic_id).collect();
        let topic_names: HashMap<Uuid, String> = self
            .store
            .list_topics(&topic_ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();

        let tests = self.store.list_tests(&test_ids).await?;
        let subject_ids: Vec<Uuid> = tests.iter().filter_map(|t| t.subject_id).collect();
        let subject_names: HashMap<Uuid, String> = self
            .store
            .list_subjects(&subject_ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();

        Ok(Lookup {
            slot_marks,
            question_marks: questions.iter().map(|q| (q.id, q.marks)).collect(),
            question_topic: questions
                .iter()
                .filter_map(|q| {
                    let name = topic_names.get(&q.topic_id?)?;
                    Some((q.id, name.clone()))
                })
                .collect(),
            test_subject: tests
                .iter()
                .filter_map(|t| {
                    let name = subject_names.get(&t.subject_id?)?;
                    Some((t.id, name.clone()))
                })
                .collect(),
        })
    }
}
