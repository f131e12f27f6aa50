use std::collections::BTreeMap;

use rand::seq::{index, SliceRandom};
use rand::Rng;

use crate::error::{Error, Result};
use crate::models::exam::Exam;
use crate::models::question::Question;

/// The questions frozen into a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawnSet {
    pub question_ids: Vec<i64>,
    /// Presentation order of choice ids per question. Empty unless the exam
    /// shuffles choices.
    pub choice_order: BTreeMap<i64, Vec<i64>>,
}

impl DrawnSet {
    pub fn choice_order_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .choice_order
            .iter()
            .map(|(id, order)| (id.to_string(), serde_json::json!(order)))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// How many questions a session for `exam` gets from a bank of `available`.
pub fn draw_size(exam: &Exam, available: usize) -> usize {
    match usize::try_from(exam.exam_question_count) {
        Ok(0) | Err(_) => available,
        Ok(n) => n.min(available),
    }
}

/// Draws a uniform random subset of `bank`. Without question shuffling the
/// subset keeps bank order (sequence, then id).
pub fn draw_questions<R: Rng + ?Sized>(
    exam: &Exam,
    bank: &[Question],
    rng: &mut R,
) -> Result<DrawnSet> {
    if bank.is_empty() {
        return Err(Error::NoQuestionsAvailable);
    }

    let mut ordered: Vec<&Question> = bank.iter().collect();
    ordered.sort_by_key(|q| (q.sequence, q.id));

    let n = draw_size(exam, ordered.len());
    let mut picked: Vec<usize> = index::sample(rng, ordered.len(), n).into_vec();
    picked.sort_unstable();

    let mut chosen: Vec<&Question> = picked.into_iter().map(|i| ordered[i]).collect();
    if exam.shuffle_questions {
        chosen.shuffle(rng);
    }

    let mut choice_order = BTreeMap::new();
    if exam.shuffle_choices {
        for q in chosen.iter().filter(|q| !q.choices.is_empty()) {
            let mut ids: Vec<i64> = q.choices.iter().map(|c| c.id).collect();
            ids.shuffle(rng);
            choice_order.insert(q.id, ids);
        }
    }

    Ok(DrawnSet {
        question_ids: chosen.iter().map(|q| q.id).collect(),
        choice_order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::fixtures::exam;
    use crate::models::question::fixtures::question;
    use crate::models::question::QuestionType;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn bank(n: i64) -> Vec<Question> {
        (1..=n)
            .map(|id| question(id, QuestionType::SingleChoice, &[true, false, false, false]))
            .collect()
    }

    #[test]
    fn draws_exactly_the_configured_count_without_duplicates() {
        let mut e = exam(50);
        e.exam_question_count = 10;
        let mut rng = StdRng::seed_from_u64(7);
        let drawn = draw_questions(&e, &bank(25), &mut rng).unwrap();

        assert_eq!(drawn.question_ids.len(), 10);
        let unique: HashSet<_> = drawn.question_ids.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(drawn.question_ids.iter().all(|id| (1..=25).contains(id)));
        // no shuffle: bank order is kept
        let mut sorted = drawn.question_ids.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, drawn.question_ids);
        assert!(drawn.choice_order.is_empty());
    }

    #[test]
    fn small_bank_yields_everything() {
        let mut e = exam(50);
        e.exam_question_count = 10;
        let mut rng = StdRng::seed_from_u64(1);
        let drawn = draw_questions(&e, &bank(4), &mut rng).unwrap();
        assert_eq!(drawn.question_ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn zero_count_means_the_whole_bank() {
        let mut e = exam(50);
        e.exam_question_count = 0;
        assert_eq!(draw_size(&e, 12), 12);
    }

    #[test]
    fn empty_bank_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            draw_questions(&exam(50), &[], &mut rng),
            Err(Error::NoQuestionsAvailable)
        ));
    }

    #[test]
    fn shuffled_choices_are_a_permutation() {
        let mut e = exam(50);
        e.shuffle_questions = true;
        e.shuffle_choices = true;
        let mut rng = StdRng::seed_from_u64(42);
        let drawn = draw_questions(&e, &bank(6), &mut rng).unwrap();

        assert_eq!(drawn.question_ids.len(), 6);
        for id in &drawn.question_ids {
            let mut order = drawn.choice_order[id].clone();
            order.sort_unstable();
            assert_eq!(order, vec![id * 10 + 1, id * 10 + 2, id * 10 + 3, id * 10 + 4]);
        }
        let json = drawn.choice_order_json();
        assert!(json.get("1").is_some());
    }

    #[test]
    fn same_seed_same_draw() {
        let mut e = exam(50);
        e.exam_question_count = 5;
        e.shuffle_questions = true;
        let a = draw_questions(&e, &bank(20), &mut StdRng::seed_from_u64(9)).unwrap();
        let b = draw_questions(&e, &bank(20), &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }
}
