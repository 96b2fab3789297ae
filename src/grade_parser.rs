use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::models::{GradingResult, ParseOutcome, QuestionRecord};

const SEPARATOR: &str = " - ";

static PAIR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+ - \d+(\s*\([^)]*\))?").expect("grading pair pattern"));

static COMMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^)]+)\)").expect("grading comment pattern"));

/// Scan model output such as `1 - 8, 2 - 6 (needs more detail)` into per-question records.
///
/// Records keep source order. Text without a single `<question> - <marks>` pair comes back
/// as [`ParseOutcome::Unparsed`] so callers can tell "zero marks" from "unreadable output".
pub fn parse_grading_text(text: &str) -> ParseOutcome {
    let records: Vec<QuestionRecord> = PAIR_PATTERN
        .find_iter(text)
        .filter_map(|pair| parse_pair(pair.as_str()))
        .collect();

    if records.is_empty() {
        debug!(
            text_length = text.len(),
            "No question/marks pairs found in grading text"
        );
        return ParseOutcome::Unparsed {
            raw_text: text.to_string(),
        };
    }

    let total = total_marks(&records);
    debug!(
        record_count = records.len(),
        total = total,
        "Parsed grading text"
    );
    ParseOutcome::Parsed { records, total }
}

/// Fail-open convenience: unparseable text yields an empty breakdown and a zero total
pub fn parse_grading_result(text: &str) -> GradingResult {
    parse_grading_text(text).into_result()
}

/// Saturates at the `i64` bounds rather than overflowing
pub fn total_marks(records: &[QuestionRecord]) -> i64 {
    records.iter().map(|r| r.marks).fold(0, i64::saturating_add)
}

fn parse_pair(pair: &str) -> Option<QuestionRecord> {
    let (question, marks_part) = pair.split_once(SEPARATOR)?;

    let digits: String = marks_part
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    // Overlong digit runs overflow i64; they count as zero like any other unreadable mark
    let marks = digits.parse::<i64>().unwrap_or(0);

    let comment = COMMENT_PATTERN
        .captures(marks_part)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    Some(QuestionRecord {
        question: question.to_string(),
        marks,
        comment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(outcome: ParseOutcome) -> (Vec<QuestionRecord>, i64) {
        match outcome {
            ParseOutcome::Parsed { records, total } => (records, total),
            ParseOutcome::Unparsed { raw_text } => panic!("expected parsed outcome for {raw_text:?}"),
        }
    }

    #[test]
    fn test_comma_separated_pairs() {
        let (records, total) = records(parse_grading_text("1 - 8, 2 - 6, 3 - 10"));

        assert_eq!(
            records,
            vec![
                QuestionRecord::new("1", 8, ""),
                QuestionRecord::new("2", 6, ""),
                QuestionRecord::new("3", 10, ""),
            ]
        );
        assert_eq!(total, 24);
    }

    #[test]
    fn test_parenthesized_comment_is_extracted() {
        let (records, total) = records(parse_grading_text("1 - 7 (missed step 2)"));

        assert_eq!(records, vec![QuestionRecord::new("1", 7, "missed step 2")]);
        assert_eq!(total, 7);
    }

    #[test]
    fn test_comment_after_extra_whitespace() {
        let (records, _) = records(parse_grading_text("1 - 9, 2 - 6  (needs detail), 3 - 4"));

        assert_eq!(records[1], QuestionRecord::new("2", 6, "needs detail"));
        assert_eq!(records[2].comment, "");
    }

    #[test]
    fn test_empty_parentheses_give_empty_comment() {
        let (records, _) = records(parse_grading_text("4 - 5 ()"));
        assert_eq!(records, vec![QuestionRecord::new("4", 5, "")]);
    }

    #[test]
    fn test_no_matches_is_unparsed() {
        for text in ["", "No response received", "Question one: eight marks"] {
            let outcome = parse_grading_text(text);
            assert_eq!(
                outcome,
                ParseOutcome::Unparsed {
                    raw_text: text.to_string()
                }
            );

            let result = parse_grading_result(text);
            assert!(result.breakdown.is_empty());
            assert_eq!(result.total, 0);
        }
    }

    #[test]
    fn test_source_order_is_preserved() {
        let (records, total) = records(parse_grading_text("3 - 4, 1 - 9, 2 - 2"));

        let questions: Vec<&str> = records.iter().map(|r| r.question.as_str()).collect();
        assert_eq!(questions, vec!["3", "1", "2"]);
        assert_eq!(total, 15);
    }

    #[test]
    fn test_marks_above_ten_are_not_clamped() {
        let (records, total) = records(parse_grading_text("1 - 15, 2 - 3"));

        assert_eq!(records[0].marks, 15);
        assert_eq!(total, 18);
    }

    #[test]
    fn test_pairs_embedded_in_prose() {
        let text = "Here are the grades:\n1 - 8\n2 - 6 (needs more detail)\nOverall good work.";
        let (records, total) = records(parse_grading_text(text));

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].comment, "needs more detail");
        assert_eq!(total, 14);
    }

    #[test]
    fn test_separator_without_spaces_does_not_match() {
        assert!(parse_grading_text("1-8, 2-6").needs_manual_review());
    }

    #[test]
    fn test_overflowing_mark_counts_as_zero() {
        let (records, total) = records(parse_grading_text("1 - 99999999999999999999999, 2 - 4"));

        assert_eq!(records[0].marks, 0);
        assert_eq!(total, 4);
    }

    #[test]
    fn test_total_saturates_instead_of_overflowing() {
        let result = parse_grading_result("1 - 9223372036854775807, 2 - 1");

        assert_eq!(result.breakdown[0].marks, i64::MAX);
        assert_eq!(result.breakdown[1].marks, 1);
        assert_eq!(result.total, i64::MAX);

        let records = vec![QuestionRecord::new("1", i64::MIN, ""), QuestionRecord::new("2", -5, "")];
        assert_eq!(total_marks(&records), i64::MIN);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let text = "1 - 8 (good), 2 - 6, 3 - 0 (blank)";
        assert_eq!(parse_grading_text(text), parse_grading_text(text));
    }
}
