//! Scoring engine. Everything here is a pure function of the exam
//! configuration, the session's question definitions and the stored answers;
//! persistence lives in `attempt_service` and `review_service`.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::dto::exam_dto::AnswerPayload;
use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::exam_session::SessionStatus;
use crate::models::question::{Question, QuestionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Correct,
    Incorrect,
    /// Free text, left for an administrator.
    Manual,
}

/// Which notification a finished session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Passed,
    Failed,
    PendingReview,
}

impl OutcomeKind {
    pub fn for_status(status: SessionStatus) -> Option<Self> {
        match status {
            SessionStatus::Passed => Some(OutcomeKind::Passed),
            SessionStatus::Failed | SessionStatus::Timeout => Some(OutcomeKind::Failed),
            SessionStatus::PendingReview => Some(OutcomeKind::PendingReview),
            SessionStatus::InProgress => None,
        }
    }
}

/// Rejects answer shapes that do not fit the question type.
pub fn validate_answer(question: &Question, answer: &AnswerPayload) -> Result<()> {
    let has_text = answer.text().is_some();
    let has_many = answer.choice_ids.as_ref().map_or(false, |ids| !ids.is_empty());

    match question.question_type {
        QuestionType::Text => {
            if answer.choice_id.is_some() || has_many {
                return Err(Error::InvalidAnswerPayload(format!(
                    "question {} expects a text answer",
                    question.id
                )));
            }
        }
        QuestionType::SingleChoice | QuestionType::TrueFalse => {
            if has_text || has_many {
                return Err(Error::InvalidAnswerPayload(format!(
                    "question {} expects a single choice",
                    question.id
                )));
            }
            if let Some(choice_id) = answer.choice_id {
                ensure_choice(question, choice_id)?;
            }
        }
        QuestionType::MultipleChoice => {
            if has_text || answer.choice_id.is_some() {
                return Err(Error::InvalidAnswerPayload(format!(
                    "question {} expects a set of choices",
                    question.id
                )));
            }
            for choice_id in answer.choice_ids.iter().flatten() {
                ensure_choice(question, *choice_id)?;
            }
        }
    }
    Ok(())
}

fn ensure_choice(question: &Question, choice_id: i64) -> Result<()> {
    if question.has_choice(choice_id) {
        Ok(())
    } else {
        Err(Error::InvalidAnswerPayload(format!(
            "choice {} does not belong to question {}",
            choice_id, question.id
        )))
    }
}

pub fn evaluate(question: &Question, answer: &AnswerPayload) -> Evaluation {
    let correct = question.correct_choice_ids();
    let is_correct = match question.question_type {
        QuestionType::Text => return Evaluation::Manual,
        QuestionType::SingleChoice | QuestionType::TrueFalse => match answer.choice_id {
            Some(choice_id) => correct.len() == 1 && correct.contains(&choice_id),
            None => false,
        },
        // Exact set match, no partial credit.
        QuestionType::MultipleChoice => {
            let submitted: BTreeSet<i64> = answer.choice_ids.iter().flatten().copied().collect();
            !submitted.is_empty() && submitted == correct
        }
    };
    if is_correct {
        Evaluation::Correct
    } else {
        Evaluation::Incorrect
    }
}

/// `floor(correct * 100 / auto_graded)` where auto_graded excludes text
/// questions; 0 when nothing is auto-graded. Capped at 100.
pub fn percentage(correct: usize, total_questions: usize, text_questions: usize) -> i32 {
    let auto_graded = total_questions.saturating_sub(text_questions);
    if auto_graded == 0 {
        return 0;
    }
    (correct * 100 / auto_graded).min(100) as i32
}

pub fn text_question_count(questions: &[Question]) -> usize {
    questions.iter().filter(|q| q.is_text()).count()
}

/// Counts auto-graded answers that are correct. Only answers to questions in
/// `questions` count; the last answer per question wins.
pub fn count_auto_correct(questions: &[Question], answers: &[AnswerPayload]) -> usize {
    let by_id: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    let latest: HashMap<i64, &AnswerPayload> =
        answers.iter().map(|a| (a.question_id, a)).collect();

    latest
        .values()
        .filter_map(|a| by_id.get(&a.question_id).map(|q| evaluate(q, a)))
        .filter(|e| *e == Evaluation::Correct)
        .count()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub status: SessionStatus,
    pub score: i32,
    pub passed: bool,
    pub correct_auto: usize,
    pub text_questions: usize,
    pub needs_manual_grading: bool,
    pub auto_graded_score: Option<i32>,
    pub time_exceeded: bool,
}

impl SubmissionOutcome {
    /// Certificates follow a clean pass: no timeout and no unresolved text.
    pub fn issues_certificate(&self) -> bool {
        self.status == SessionStatus::Passed && !self.needs_manual_grading
    }

    pub fn notification(&self) -> Option<OutcomeKind> {
        OutcomeKind::for_status(self.status)
    }
}

pub fn decide_submission(
    exam: &Exam,
    total_questions: usize,
    text_questions: usize,
    correct_auto: usize,
    time_exceeded: bool,
) -> SubmissionOutcome {
    let score = percentage(correct_auto, total_questions, text_questions);
    let passed = score >= exam.passing_score;
    let has_text = text_questions > 0;

    let status = if time_exceeded {
        SessionStatus::Timeout
    } else if has_text {
        if passed && exam.show_results_immediately {
            SessionStatus::Passed
        } else {
            SessionStatus::PendingReview
        }
    } else if passed {
        SessionStatus::Passed
    } else {
        SessionStatus::Failed
    };

    SubmissionOutcome {
        status,
        score,
        passed,
        correct_auto,
        text_questions,
        needs_manual_grading: has_text,
        auto_graded_score: has_text.then_some(score),
        time_exceeded,
    }
}

/// Scores a whole submission against the session's drawn questions.
pub fn score_session(
    exam: &Exam,
    session_questions: &[Question],
    total_questions: usize,
    answers: &[AnswerPayload],
    time_exceeded: bool,
) -> SubmissionOutcome {
    let correct = count_auto_correct(session_questions, answers);
    let text = text_question_count(session_questions);
    decide_submission(exam, total_questions, text, correct, time_exceeded)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewOutcome {
    pub status: SessionStatus,
    pub score: i32,
    pub passed: bool,
    pub auto_graded_correct: usize,
    pub text_questions_correct: usize,
    pub total_correct: usize,
}

/// Graded text answers add to the numerator but not the denominator, so a
/// review score can reach the 100 cap of `percentage`.
pub fn decide_review(
    exam: &Exam,
    total_questions: usize,
    text_questions: usize,
    auto_graded_correct: usize,
    text_questions_correct: usize,
) -> ReviewOutcome {
    let total_correct = auto_graded_correct + text_questions_correct;
    let score = percentage(total_correct, total_questions, text_questions);
    let passed = score >= exam.passing_score;
    ReviewOutcome {
        status: if passed {
            SessionStatus::Passed
        } else {
            SessionStatus::Failed
        },
        score,
        passed,
        auto_graded_correct,
        text_questions_correct,
        total_correct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::fixtures::exam;
    use crate::models::question::fixtures::{question, text_question};

    fn single(question_id: i64, choice_id: i64) -> AnswerPayload {
        AnswerPayload {
            question_id,
            choice_id: Some(choice_id),
            ..Default::default()
        }
    }

    fn multi(question_id: i64, choice_ids: &[i64]) -> AnswerPayload {
        AnswerPayload {
            question_id,
            choice_ids: Some(choice_ids.to_vec()),
            ..Default::default()
        }
    }

    fn text(question_id: i64, body: &str) -> AnswerPayload {
        AnswerPayload {
            question_id,
            answer_text: Some(body.to_string()),
            ..Default::default()
        }
    }

    fn two_single_choice() -> Vec<Question> {
        vec![
            question(1, QuestionType::SingleChoice, &[true, false]),
            question(2, QuestionType::SingleChoice, &[false, true]),
        ]
    }

    #[test]
    fn all_correct_single_choice_passes() {
        let qs = two_single_choice();
        let outcome = score_session(&exam(70), &qs, 2, &[single(1, 11), single(2, 22)], false);
        assert_eq!(outcome.score, 100);
        assert_eq!(outcome.status, SessionStatus::Passed);
        assert!(outcome.issues_certificate());
        assert_eq!(outcome.auto_graded_score, None);
    }

    #[test]
    fn half_correct_fails() {
        let qs = two_single_choice();
        let outcome = score_session(&exam(70), &qs, 2, &[single(1, 11), single(2, 21)], false);
        assert_eq!(outcome.score, 50);
        assert_eq!(outcome.status, SessionStatus::Failed);
        assert_eq!(outcome.notification(), Some(OutcomeKind::Failed));
    }

    #[test]
    fn multiple_choice_requires_the_exact_set() {
        // correct set is {A, C} = {11, 13}
        let q = question(1, QuestionType::MultipleChoice, &[true, false, true]);
        assert_eq!(evaluate(&q, &multi(1, &[11, 12, 13])), Evaluation::Incorrect);
        assert_eq!(evaluate(&q, &multi(1, &[11])), Evaluation::Incorrect);
        assert_eq!(evaluate(&q, &multi(1, &[13, 11])), Evaluation::Correct);
        assert_eq!(evaluate(&q, &multi(1, &[11, 13, 13])), Evaluation::Correct);
        assert_eq!(evaluate(&q, &multi(1, &[])), Evaluation::Incorrect);
    }

    #[test]
    fn true_false_and_unanswered() {
        let q = question(5, QuestionType::TrueFalse, &[false, true]);
        assert_eq!(evaluate(&q, &single(5, 52)), Evaluation::Correct);
        assert_eq!(evaluate(&q, &single(5, 51)), Evaluation::Incorrect);
        assert_eq!(
            evaluate(&q, &AnswerPayload { question_id: 5, ..Default::default() }),
            Evaluation::Incorrect
        );
    }

    #[test]
    fn text_is_never_auto_evaluated() {
        let q = text_question(3);
        assert_eq!(evaluate(&q, &text(3, "loam soil")), Evaluation::Manual);
    }

    #[test]
    fn early_pass_when_results_are_shown_immediately() {
        let mut e = exam(50);
        e.show_results_immediately = true;
        let qs = vec![
            question(1, QuestionType::SingleChoice, &[true, false]),
            question(2, QuestionType::SingleChoice, &[true, false]),
            text_question(3),
        ];
        let answers = [single(1, 11), single(2, 21), text(3, "crop rotation")];
        let outcome = score_session(&e, &qs, 3, &answers, false);
        assert_eq!(outcome.score, 100);
        assert_eq!(outcome.status, SessionStatus::Passed);
        assert!(outcome.needs_manual_grading);
        assert_eq!(outcome.auto_graded_score, Some(100));
        assert!(!outcome.issues_certificate());
    }

    #[test]
    fn text_questions_go_to_review_then_recompute() {
        let e = exam(50);
        let qs = vec![
            question(1, QuestionType::SingleChoice, &[true, false]),
            question(2, QuestionType::SingleChoice, &[true, false]),
            text_question(3),
        ];
        let answers = [single(1, 11), single(2, 21), text(3, "crop rotation")];
        let outcome = score_session(&e, &qs, 3, &answers, false);
        assert_eq!(outcome.status, SessionStatus::PendingReview);
        assert_eq!(outcome.auto_graded_score, Some(100));
        assert_eq!(outcome.notification(), Some(OutcomeKind::PendingReview));

        let review = decide_review(&e, 3, 1, outcome.correct_auto, 1);
        assert_eq!(review.total_correct, 3);
        assert_eq!(review.score, 100);
        assert_eq!(review.status, SessionStatus::Passed);

        let review = decide_review(&e, 3, 1, 0, 0);
        assert_eq!(review.score, 0);
        assert_eq!(review.status, SessionStatus::Failed);
    }

    #[test]
    fn review_score_is_capped_at_100() {
        // 3 correct over 2 auto-graded questions
        assert_eq!(percentage(3, 3, 1), 100);
        let review = decide_review(&exam(90), 3, 1, 2, 1);
        assert_eq!(review.total_correct, 3);
        assert_eq!(review.score, 100);
        assert!(review.passed);
    }

    #[test]
    fn timeout_overrides_everything() {
        let mut e = exam(10);
        e.show_results_immediately = true;
        let qs = two_single_choice();
        let outcome = score_session(&e, &qs, 2, &[single(1, 11), single(2, 22)], true);
        assert_eq!(outcome.status, SessionStatus::Timeout);
        assert_eq!(outcome.score, 100);
        assert!(!outcome.issues_certificate());
        assert_eq!(outcome.notification(), Some(OutcomeKind::Failed));
    }

    #[test]
    fn text_only_exam_scores_zero_until_graded() {
        let qs = vec![text_question(1), text_question(2)];
        let outcome = score_session(&exam(0), &qs, 2, &[text(1, "a"), text(2, "b")], false);
        assert_eq!(outcome.score, 0);
        assert_eq!(outcome.status, SessionStatus::PendingReview);
        assert_eq!(percentage(2, 2, 2), 0);
    }

    #[test]
    fn answers_outside_the_session_are_ignored() {
        let qs = two_single_choice();
        let outcome = score_session(
            &exam(50),
            &qs,
            2,
            &[single(1, 11), single(99, 991), single(2, 21), single(2, 22)],
            false,
        );
        assert_eq!(outcome.correct_auto, 2);
        assert_eq!(outcome.score, 100);
    }

    #[test]
    fn unanswered_questions_still_count_in_the_denominator() {
        let qs = two_single_choice();
        let outcome = score_session(&exam(50), &qs, 2, &[single(1, 11)], false);
        assert_eq!(outcome.score, 50);
        assert_eq!(outcome.status, SessionStatus::Passed);
    }

    #[test]
    fn payload_shape_is_checked_against_the_question_type() {
        let single_q = question(1, QuestionType::SingleChoice, &[true, false]);
        let multi_q = question(2, QuestionType::MultipleChoice, &[true, true]);
        let text_q = text_question(3);

        assert!(validate_answer(&single_q, &single(1, 11)).is_ok());
        assert!(matches!(
            validate_answer(&single_q, &text(1, "nope")),
            Err(Error::InvalidAnswerPayload(_))
        ));
        assert!(matches!(
            validate_answer(&single_q, &single(1, 99)),
            Err(Error::InvalidAnswerPayload(_))
        ));
        assert!(validate_answer(&multi_q, &multi(2, &[21, 22])).is_ok());
        assert!(validate_answer(&multi_q, &single(2, 21)).is_err());
        assert!(validate_answer(&text_q, &text(3, "answer")).is_ok());
        assert!(validate_answer(&text_q, &single(3, 31)).is_err());
        // blank text on a choice question is treated as no text
        let blank = AnswerPayload {
            question_id: 1,
            choice_id: Some(12),
            answer_text: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(validate_answer(&single_q, &blank).is_ok());
    }
}
