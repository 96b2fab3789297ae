use crate::models::FeedbackMap;

/// Split `<ExamLabel>: <text>` lines into a label map.
///
/// Only the first colon separates label from text. Lines without a colon or with an empty
/// label are dropped, and a repeated label keeps the text of its last occurrence.
pub fn split_feedback(text: &str) -> FeedbackMap {
    let mut feedback = FeedbackMap::new();

    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        let Some((label, message)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        feedback.insert(label.to_string(), message.trim().to_string());
    }

    feedback
}
