mod common;

use chrono::Duration;
use rust_decimal::Decimal;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use common::{exam_day, Fixture};
use exam_backend::database::ExamStore;
use exam_backend::error::Error;
use exam_backend::models::answer::AnswerStatus;
use exam_backend::models::test_attempt::{AttemptStatus, SubmitCause, TestAttempt};
use exam_backend::services::attempt_service::AttemptView;

#[tokio::test]
async fn one_of_two_correct_scores_fifty_percent() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let allocation = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;

    let attempt = assert_ok!(svc.start_attempt(allocation.id, student).await);
    assert_eq!(attempt.status, AttemptStatus::InProgress);

    fx.clock.advance(Duration::minutes(12));
    assert_ok!(
        svc.save_answer(attempt.id, student, fx.questions[0].id, Some("a".into()), false)
            .await
    );

    let result = assert_ok!(svc.submit(attempt.id, student).await);
    assert_eq!(result.obtained_marks, 1);
    assert_eq!(result.total_marks, 2);
    assert_eq!(result.percentage, Decimal::from(50));
    assert!(result.is_passed);
    assert_eq!(result.time_taken_minutes, 12);

    let allocation = fx.store.get_allocation(allocation.id).await.unwrap().unwrap();
    assert!(allocation.is_completed);

    let review = assert_ok!(svc.review(attempt.id, student).await);
    assert_eq!(review.attempt.reported_status(), AttemptStatus::Submitted);
    assert_eq!(review.questions.len(), 2);
    assert!(review.questions[0].is_correct);
    assert_eq!(review.questions[0].correct_answer.as_deref(), Some("A"));
    assert_eq!(review.questions[1].status, AnswerStatus::Unvisited);

    let topics = &review.breakdown.topics;
    assert_eq!(topics.len(), 2);
    assert_eq!(topics[0].topic_name, "Kinematics");
    assert_eq!(topics[0].correct_answers, 1);
    assert_eq!(topics[1].topic_name, "Optics");
    assert_eq!(topics[1].questions_attempted, 0);
    assert_eq!(review.breakdown.subjects[0].subject_name, "Physics");
}

#[tokio::test]
async fn expired_attempt_is_finalized_on_review() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let allocation = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;

    let attempt = assert_ok!(svc.start_attempt(allocation.id, student).await);
    assert_ok!(
        svc.save_answer(attempt.id, student, fx.questions[1].id, Some("B".into()), false)
            .await
    );

    fx.clock.advance(Duration::minutes(61));
    let review = assert_ok!(svc.review(attempt.id, student).await);
    assert_eq!(review.attempt.submit_cause, Some(SubmitCause::TimeExpired));
    assert_eq!(review.attempt.reported_status(), AttemptStatus::TimeExpired);
    assert_eq!(review.result.obtained_marks, 1);
    assert_eq!(review.result.time_taken_minutes, 61);

    let err = assert_err!(
        svc.save_answer(attempt.id, student, fx.questions[0].id, Some("A".into()), false)
            .await
    );
    assert!(matches!(err, Error::AlreadySubmitted));
}

#[tokio::test]
async fn deadline_itself_is_not_expired() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let allocation = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;

    let attempt = assert_ok!(svc.start_attempt(allocation.id, student).await);
    fx.clock.advance(Duration::minutes(60));
    match assert_ok!(svc.open_attempt(attempt.id, student).await) {
        AttemptView::InProgress(session) => assert_eq!(session.seconds_remaining, 0),
        AttemptView::Finished(_) => panic!("attempt closed at its deadline"),
    }

    fx.clock.advance(Duration::seconds(1));
    let view = assert_ok!(svc.open_attempt(attempt.id, student).await);
    assert!(matches!(view, AttemptView::Finished(a) if a.reported_status() == AttemptStatus::TimeExpired));
}

#[tokio::test]
async fn start_before_window_is_refused() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let start = exam_day() + Duration::hours(2);
    let allocation = fx.allocate(student, start, start + Duration::hours(1)).await;

    let err = assert_err!(fx.state.attempt_service.start_attempt(allocation.id, student).await);
    assert!(matches!(err, Error::WindowNotOpen));

    let err = assert_err!(fx.state.attempt_service.instructions(allocation.id, student).await);
    assert!(matches!(err, Error::WindowNotOpen));

    fx.clock.advance(Duration::minutes(95));
    let preview = assert_ok!(fx.state.attempt_service.instructions(allocation.id, student).await);
    assert!(!preview.can_start);
    assert_eq!(preview.question_count, 2);
}

#[tokio::test]
async fn closed_window_respects_late_submission_flag() {
    let strict = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let start = exam_day() - Duration::hours(3);
    let allocation = strict.allocate(student, start, start + Duration::hours(1)).await;
    let err = assert_err!(strict.state.attempt_service.start_attempt(allocation.id, student).await);
    assert!(matches!(err, Error::WindowClosed));

    let lenient = Fixture::new(|t| t.allow_late_submission = true);
    let allocation = lenient.allocate(student, start, start + Duration::hours(1)).await;
    assert_ok!(lenient.state.attempt_service.start_attempt(allocation.id, student).await);
}

#[tokio::test]
async fn other_students_allocation_is_not_theirs() {
    let fx = Fixture::new(|_| {});
    let owner = Uuid::new_v4();
    let allocation = fx.allocate_open(owner).await;

    let err = assert_err!(
        fx.state
            .attempt_service
            .start_attempt(allocation.id, Uuid::new_v4())
            .await
    );
    assert!(matches!(err, Error::NotAllocated));

    let attempt = assert_ok!(fx.state.attempt_service.start_attempt(allocation.id, owner).await);
    let err = assert_err!(fx.state.attempt_service.open_attempt(attempt.id, Uuid::new_v4()).await);
    assert!(matches!(err, Error::AttemptNotFound));
}

#[tokio::test]
async fn starting_twice_resumes_the_same_attempt() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let allocation = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;

    let first = assert_ok!(svc.start_attempt(allocation.id, student).await);
    fx.clock.advance(Duration::minutes(5));
    let second = assert_ok!(svc.start_attempt(allocation.id, student).await);
    assert_eq!(first.id, second.id);
    assert_eq!(first.started_at, second.started_at);

    assert_ok!(svc.submit(first.id, student).await);
    let err = assert_err!(svc.start_attempt(allocation.id, student).await);
    assert!(matches!(err, Error::AlreadySubmitted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_have_one_winner() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let allocation = fx.allocate_open(student).await;
    let attempt = assert_ok!(fx.state.attempt_service.start_attempt(allocation.id, student).await);
    let attempt_id = attempt.id;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let svc = fx.state.attempt_service.clone();
            tokio::spawn(async move { svc.submit(attempt_id, student).await })
        })
        .collect();

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(Error::AlreadySubmitted) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(wins, 1);

    let err = assert_err!(
        fx.state
            .attempt_service
            .finalize(attempt_id, SubmitCause::Manual)
            .await
    );
    assert!(matches!(err, Error::AlreadySubmitted));
}

#[tokio::test]
async fn shuffled_order_is_stable_and_appends_new_questions() {
    let fx = Fixture::new(|t| t.shuffle_questions = true);
    let student = Uuid::new_v4();
    let allocation = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;

    let attempt = assert_ok!(svc.start_attempt(allocation.id, student).await);
    let mut stored = attempt.shuffled_order.clone().expect("shuffled order");
    stored.sort();
    let mut natural: Vec<Uuid> = fx.questions.iter().map(|q| q.id).collect();
    natural.sort();
    assert_eq!(stored, natural);

    let added = fx.add_question("C");
    let AttemptView::InProgress(first) = assert_ok!(svc.open_attempt(attempt.id, student).await)
    else {
        panic!("attempt should be running");
    };
    let AttemptView::InProgress(second) = assert_ok!(svc.open_attempt(attempt.id, student).await)
    else {
        panic!("attempt should be running");
    };

    let order: Vec<Uuid> = first.questions.iter().map(|q| q.question_id).collect();
    let again: Vec<Uuid> = second.questions.iter().map(|q| q.question_id).collect();
    assert_eq!(order, again);
    assert_eq!(order.len(), 3);
    assert_eq!(order[2], added.id);
    assert_eq!(&order[..2], attempt.shuffled_order.as_deref().unwrap());
}

#[tokio::test]
async fn visiting_never_downgrades_an_answer() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let allocation = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;
    let attempt = assert_ok!(svc.start_attempt(allocation.id, student).await);
    let [q1, q2] = [fx.questions[0].id, fx.questions[1].id];

    assert_eq!(
        assert_ok!(svc.mark_visited(attempt.id, student, q2).await),
        AnswerStatus::Visited
    );
    assert_ok!(svc.save_answer(attempt.id, student, q1, Some("C".into()), false).await);
    assert_eq!(
        assert_ok!(svc.mark_visited(attempt.id, student, q1).await),
        AnswerStatus::Answered
    );

    let err = assert_err!(svc.mark_visited(attempt.id, student, Uuid::new_v4()).await);
    assert!(matches!(err, Error::QuestionNotInTest));
}

#[tokio::test]
async fn review_waits_for_submission_and_hides_keys_when_configured() {
    let fx = Fixture::new(|t| t.show_results_immediately = false);
    let student = Uuid::new_v4();
    let allocation = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;
    let attempt = assert_ok!(svc.start_attempt(allocation.id, student).await);

    let err = assert_err!(svc.review(attempt.id, student).await);
    assert!(matches!(err, Error::AttemptInProgress));

    assert_ok!(svc.submit(attempt.id, student).await);
    let review = assert_ok!(svc.review(attempt.id, student).await);
    assert!(review.questions.iter().all(|q| q.correct_answer.is_none()));
    assert!(review.questions.iter().all(|q| q.explanation.is_none()));
    assert_eq!(review.result.obtained_marks, 0);
    assert!(!review.result.is_passed);
}

#[tokio::test]
async fn reports_aggregate_final_results() {
    let fx = Fixture::new(|_| {});
    let svc = &fx.state.attempt_service;
    let strong = Uuid::new_v4();
    let weak = Uuid::new_v4();
    let idle = Uuid::new_v4();

    for (student, answers) in [(strong, ["A", "B"]), (weak, ["D", "D"])] {
        let allocation = fx.allocate_open(student).await;
        let attempt = assert_ok!(svc.start_attempt(allocation.id, student).await);
        for (question, answer) in fx.questions.iter().zip(answers) {
            assert_ok!(
                svc.save_answer(attempt.id, student, question.id, Some(answer.into()), false)
                    .await
            );
        }
        assert_ok!(svc.submit(attempt.id, student).await);
    }
    fx.allocate_open(idle).await;

    let summary = assert_ok!(fx.state.projection_service.test_summary(fx.test.id).await);
    assert_eq!(summary.total_allocated, 3);
    assert_eq!(summary.total_completed, 2);
    assert_eq!(summary.total_pending, 1);
    assert_eq!(summary.pass_count, 1);
    assert_eq!(summary.fail_count, 1);
    assert_eq!(summary.highest_score, 2);
    assert_eq!(summary.lowest_score, 0);
    assert_eq!(summary.average_percentage, Decimal::from(50));
    assert_eq!(summary.topics[0].questions_attempted, 2);
    assert_eq!(summary.topics[0].correct_answers, 1);
    assert_eq!(summary.topics[0].wrong_answers, 1);

    let report = assert_ok!(fx.state.projection_service.student_report(strong).await);
    assert_eq!(report.tests_taken, 1);
    assert_eq!(report.tests_passed, 1);
    assert_eq!(report.average_percentage, Decimal::from(100));
    assert_eq!(report.subjects[0].subject_name, "Physics");
    assert_eq!(report.subjects[0].tests_count, 1);

    let empty = assert_ok!(fx.state.projection_service.student_report(idle).await);
    assert_eq!(empty.tests_taken, 0);
    assert_eq!(empty.average_percentage, Decimal::ZERO);
}

#[tokio::test]
async fn second_allocation_of_a_running_test_cannot_start() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let first = fx.allocate_open(student).await;
    let second = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;

    let attempt = assert_ok!(svc.start_attempt(first.id, student).await);
    let err = assert_err!(svc.start_attempt(second.id, student).await);
    assert!(matches!(err, Error::AttemptInProgress));

    assert_ok!(svc.submit(attempt.id, student).await);
    let err = assert_err!(svc.start_attempt(second.id, student).await);
    assert!(matches!(err, Error::AlreadySubmitted));

    let dashboard = assert_ok!(svc.dashboard(student).await);
    assert!(dashboard.upcoming.is_empty());
    assert!(dashboard.in_progress.is_empty());
    assert_eq!(dashboard.completed.len(), 1);
}

#[tokio::test]
async fn expired_attempt_elsewhere_is_closed_before_refusing() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let first = fx.allocate_open(student).await;
    let second = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;

    let attempt = assert_ok!(svc.start_attempt(first.id, student).await);
    fx.clock.advance(Duration::minutes(61));

    let err = assert_err!(svc.start_attempt(second.id, student).await);
    assert!(matches!(err, Error::AlreadySubmitted));
    let closed = fx.store.get_attempt(attempt.id).await.unwrap().unwrap();
    assert_eq!(closed.reported_status(), AttemptStatus::TimeExpired);
}

#[tokio::test]
async fn attempt_sharing_a_final_result_is_closed() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let first = fx.allocate_open(student).await;
    let second = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;

    // Two starts that raced past the running-attempt check.
    let winner = assert_ok!(svc.start_attempt(first.id, student).await);
    let stray = fx
        .store
        .insert_attempt(&TestAttempt::begin(second.id, student, fx.test.id, exam_day(), None))
        .await
        .unwrap();
    assert_ok!(svc.open_attempt(stray.id, student).await);
    assert_ok!(
        svc.save_answer(winner.id, student, fx.questions[0].id, Some("A".into()), false)
            .await
    );
    let result = assert_ok!(svc.submit(winner.id, student).await);

    let err = assert_err!(svc.submit(stray.id, student).await);
    assert!(matches!(err, Error::AlreadySubmitted));
    let closed = fx.store.get_attempt(stray.id).await.unwrap().unwrap();
    assert_eq!(closed.status, AttemptStatus::Submitted);

    let review = assert_ok!(svc.review(stray.id, student).await);
    assert_eq!(review.result.id, result.id);
    assert_eq!(review.result.obtained_marks, 1);

    let dashboard = assert_ok!(svc.dashboard(student).await);
    assert!(dashboard.in_progress.is_empty());
    assert!(dashboard.upcoming.is_empty());
}

#[tokio::test]
async fn stray_attempt_is_closed_by_the_expiry_check() {
    let fx = Fixture::new(|_| {});
    let student = Uuid::new_v4();
    let first = fx.allocate_open(student).await;
    let second = fx.allocate_open(student).await;
    let svc = &fx.state.attempt_service;

    let winner = assert_ok!(svc.start_attempt(first.id, student).await);
    let stray = fx
        .store
        .insert_attempt(&TestAttempt::begin(second.id, student, fx.test.id, exam_day(), None))
        .await
        .unwrap();
    assert_ok!(svc.open_attempt(stray.id, student).await);
    assert_ok!(svc.submit(winner.id, student).await);

    fx.clock.advance(Duration::minutes(61));
    let review = assert_ok!(svc.review(stray.id, student).await);
    assert_eq!(review.attempt.reported_status(), AttemptStatus::TimeExpired);
    assert!(review.result.is_final());
}
