//! Ordering of a session's question sequence around shared reading passages.

use crate::model::{PassageKey, Question, TopicId};

fn passage_keys(question: &Question) -> Vec<PassageKey<'_>> {
    question.passage().map(|p| p.keys()).unwrap_or_default()
}

/// Arrange `questions` so that reading-comprehension questions of `topic` that share a
/// passage form contiguous runs, with the remaining questions spread between the runs.
///
/// - Questions of other kinds or topics keep their relative order.
/// - Passage runs appear in order of their first question and keep relative order inside.
/// - Before every run but the first, a slice of `ceil(others / runs)` other questions is
///   spliced in; whatever is left over follows the last run.
///
/// The result is a permutation of the input and depends only on it.
#[must_use]
pub fn group_passages(questions: Vec<Question>, topic: &TopicId) -> Vec<Question> {
    let total = questions.len();
    let (reading, others): (Vec<_>, Vec<_>) = questions
        .into_iter()
        .partition(|q| q.is_reading() && q.matches_topic(topic));

    if reading.is_empty() {
        return others;
    }

    let groups = passage_groups(reading);
    let chunk = others.len().div_ceil(groups.len());

    let mut rest = others.into_iter();
    let mut ordered = Vec::with_capacity(total);
    for (i, group) in groups.into_iter().enumerate() {
        if i > 0 {
            ordered.extend(rest.by_ref().take(chunk));
        }
        ordered.extend(group);
    }
    ordered.extend(rest);
    ordered
}

/// Split reading questions into passage groups, first-seen order.
///
/// Questions share a group when their passage bodies or their passage titles match, directly
/// or through another member. A question without any passage key forms a group on its own.
fn passage_groups(reading: Vec<Question>) -> Vec<Vec<Question>> {
    let members = {
        let keys: Vec<Vec<PassageKey<'_>>> = reading.iter().map(passage_keys).collect();
        let mut taken = vec![false; keys.len()];
        let mut members = Vec::new();

        for lead in 0..keys.len() {
            if taken[lead] {
                continue;
            }
            taken[lead] = true;
            let mut group = vec![lead];
            let mut group_keys: Vec<&PassageKey<'_>> = keys[lead].iter().collect();

            // grow until no ungrouped question shares a key with the group
            let mut grew = !group_keys.is_empty();
            while grew {
                grew = false;
                for (j, candidate) in keys.iter().enumerate().skip(lead + 1) {
                    if !taken[j] && candidate.iter().any(|k| group_keys.contains(&k)) {
                        taken[j] = true;
                        group.push(j);
                        group_keys.extend(candidate);
                        grew = true;
                    }
                }
            }
            group.sort_unstable();
            members.push(group);
        }
        members
    };

    let mut slots: Vec<Option<Question>> = reading.into_iter().map(Some).collect();
    members
        .into_iter()
        .map(|group| group.into_iter().filter_map(|i| slots[i].take()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuestionDraft, QuestionId, QuestionKind};

    const TOPIC: &str = "reading-comprehension";

    fn reading(id: u64, passage: &str) -> Question {
        QuestionDraft::new(
            id,
            QuestionKind::ReadingComprehension,
            format!("R{id}"),
            ["a", "b", "c", "d"],
            0,
        )
        .with_topic(TOPIC)
        .with_passage_text(passage)
        .validate()
        .unwrap()
    }

    fn other(id: u64) -> Question {
        QuestionDraft::new(
            id,
            QuestionKind::Vocabulary,
            format!("V{id}"),
            ["a", "b", "c", "d"],
            0,
        )
        .validate()
        .unwrap()
    }

    fn ids(questions: &[Question]) -> Vec<u64> {
        questions.iter().map(|q| q.id().value()).collect()
    }

    fn topic() -> TopicId {
        TopicId::new(TOPIC)
    }

    fn is_contiguous(ordered: &[Question], members: &[u64]) -> bool {
        let positions: Vec<usize> = ordered
            .iter()
            .enumerate()
            .filter(|(_, q)| members.contains(&q.id().value()))
            .map(|(i, _)| i)
            .collect();
        positions.len() == members.len()
            && positions.windows(2).all(|w| w[1] == w[0] + 1)
    }

    fn mixed_pool() -> Vec<Question> {
        vec![
            reading(1, "Passage A"),
            other(10),
            reading(2, "Passage B"),
            other(11),
            reading(3, "Passage A"),
            other(12),
            reading(4, "Passage B"),
        ]
    }

    #[test]
    fn single_passage_stays_contiguous() {
        let mut pool = Vec::new();
        for id in 1..=5 {
            pool.push(reading(id, "The lighthouse keeper"));
            pool.push(other(100 + id));
        }
        let ordered = group_passages(pool, &topic());
        assert!(is_contiguous(&ordered, &[1, 2, 3, 4, 5]));
        assert_eq!(ids(&ordered), vec![1, 2, 3, 4, 5, 101, 102, 103, 104, 105]);
    }

    #[test]
    fn others_are_spliced_between_groups() {
        let ordered = group_passages(mixed_pool(), &topic());
        // two groups, three others: ceil(3 / 2) = 2 before the second group
        assert_eq!(ids(&ordered), vec![1, 3, 10, 11, 2, 4, 12]);
    }

    #[test]
    fn grouping_is_deterministic() {
        let first = group_passages(mixed_pool(), &topic());
        let second = group_passages(mixed_pool(), &topic());
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn grouping_preserves_every_question() {
        let mut input = ids(&mixed_pool());
        let mut output = ids(&group_passages(mixed_pool(), &topic()));
        input.sort_unstable();
        output.sort_unstable();
        assert_eq!(input, output);
    }

    #[test]
    fn no_reading_questions_returns_input_order() {
        let pool = vec![other(3), other(1), other(2)];
        assert_eq!(ids(&group_passages(pool, &topic())), vec![3, 1, 2]);
    }

    #[test]
    fn other_topic_reading_is_not_grouped() {
        let pool = vec![reading(1, "A"), other(2), reading(3, "A")];
        let ordered = group_passages(pool, &TopicId::new("vocabulary"));
        assert_eq!(ids(&ordered), vec![1, 2, 3]);
    }

    #[test]
    fn category_match_enables_grouping() {
        let q1 = QuestionDraft::new(
            1,
            QuestionKind::ReadingComprehension,
            "R1",
            ["a", "b", "c", "d"],
            0,
        )
        .with_category(TOPIC)
        .with_passage_title("Rivers")
        .validate()
        .unwrap();
        let q3 = QuestionDraft::new(
            3,
            QuestionKind::ReadingComprehension,
            "R3",
            ["a", "b", "c", "d"],
            0,
        )
        .with_category(TOPIC)
        .with_passage_title("Rivers")
        .validate()
        .unwrap();
        let ordered = group_passages(vec![q1, other(2), q3], &topic());
        assert_eq!(ids(&ordered), vec![1, 3, 2]);
    }

    fn reading_titled(id: u64, text: Option<&str>, title: &str) -> Question {
        let mut draft = QuestionDraft::new(
            id,
            QuestionKind::ReadingComprehension,
            format!("R{id}"),
            ["a", "b", "c", "d"],
            0,
        )
        .with_topic(TOPIC)
        .with_passage_title(title);
        if let Some(text) = text {
            draft = draft.with_passage_text(text);
        }
        draft.validate().unwrap()
    }

    #[test]
    fn shared_title_groups_even_when_text_differs() {
        let pool = vec![
            reading_titled(1, Some("Body"), "Rivers"),
            other(2),
            reading_titled(3, None, "Rivers"),
        ];
        let ordered = group_passages(pool, &topic());
        assert_eq!(ids(&ordered), vec![1, 3, 2]);
    }

    #[test]
    fn groups_chain_through_shared_keys() {
        // 1 and 4 share a body, 4 and 6 share a title
        let pool = vec![
            reading_titled(1, Some("Tides"), "Harbour"),
            other(2),
            reading_titled(3, Some("Orchards"), "Farms"),
            reading_titled(4, Some("Tides"), "Coast"),
            other(5),
            reading_titled(6, None, "Coast"),
        ];
        let ordered = group_passages(pool, &topic());
        assert!(is_contiguous(&ordered, &[1, 4, 6]));
        assert_eq!(ids(&ordered), vec![1, 4, 6, 2, 3, 5]);
    }

    #[test]
    fn groups_concatenate_without_others() {
        let pool = vec![reading(1, "A"), reading(2, "B"), reading(3, "A")];
        assert_eq!(ids(&group_passages(pool, &topic())), vec![1, 3, 2]);
    }

    #[test]
    fn passageless_reading_questions_stand_alone() {
        let loose = QuestionDraft::new(
            5,
            QuestionKind::ReadingComprehension,
            "R5",
            ["a", "b", "c", "d"],
            0,
        )
        .with_topic(TOPIC)
        .validate()
        .unwrap();
        let ordered = group_passages(vec![loose, reading(6, "A"), other(7)], &topic());
        assert_eq!(ids(&ordered), vec![5, 7, 6]);
        assert_eq!(ordered[0].id(), QuestionId::new(5));
    }
}
