use anyhow::Result;
use std::time::Instant;
use tracing::debug;

use crate::config::LLMConfig;
use crate::feedback_parser::split_feedback;
use crate::llm_providers::{LLMProvider, LLMProviderFactory, PdfAttachment};
use crate::models::{ExamScores, FeedbackMap};

// Import logging macros
use crate::log_llm_operation;

pub const NO_RESPONSE_TEXT: &str = "No response received";
pub const NO_FEEDBACK_TEXT: &str = "No feedback generated.";

const GRADING_INSTRUCTION: &str = "Analyze the provided answers and grade each question out of 10 based on content accuracy, quality, and relevance. Display the results strictly in the format (Q - M) without any additional details, comments, or explanations. Example: 1 - 8, 2 - 6.";

const KEY_EXTRACTION_INSTRUCTION: &str = "give only content";

#[derive(Debug, Clone)]
pub struct LLMService {
    provider: LLMProvider,
}

impl LLMService {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        let provider = LLMProviderFactory::create_provider(config)?;
        Ok(Self { provider })
    }

    /// Get the provider name for logging and testing
    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    async fn timed_request(
        &self,
        operation: &str,
        prompt: &str,
        attachment: Option<&PdfAttachment>,
    ) -> Result<String> {
        log_llm_operation!(
            start,
            operation,
            provider = self.provider_name(),
            attachment_bytes = attachment.map(|pdf| pdf.byte_len()).unwrap_or(0)
        );
        debug!(operation, prompt = %prompt, "LLM prompt");

        let started = Instant::now();
        match self.provider.make_request(prompt, attachment).await {
            Ok(text) => {
                log_llm_operation!(
                    success,
                    operation,
                    provider = self.provider_name(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    response_length = text.len()
                );
                debug!(operation, response = %text, "LLM response");
                Ok(text)
            }
            Err(e) => {
                log_llm_operation!(error, operation, provider = self.provider_name(), error = e);
                Err(e)
            }
        }
    }

    /// Grade an answer sheet against a reference key; the reply is the model's raw `Q - M` text
    pub async fn grade_answer_sheet(&self, answer_sheet: &PdfAttachment, answer_key: &str) -> Result<String> {
        let prompt = grading_prompt(answer_key);
        let text = self
            .timed_request("grade_answer_sheet", &prompt, Some(answer_sheet))
            .await?;

        Ok(non_empty_or(text, NO_RESPONSE_TEXT, "grade_answer_sheet"))
    }

    /// Pull the plain text out of an answer-key PDF
    pub async fn extract_answer_key(&self, key_document: &PdfAttachment) -> Result<String> {
        let text = self
            .timed_request("extract_answer_key", KEY_EXTRACTION_INSTRUCTION, Some(key_document))
            .await?;

        Ok(non_empty_or(text, NO_RESPONSE_TEXT, "extract_answer_key"))
    }

    /// Teacher-voice commentary per exam plus an overall summary, split by label
    pub async fn generate_feedback(&self, student_name: &str, scores: &ExamScores) -> Result<FeedbackMap> {
        let prompt = feedback_prompt(student_name, scores);
        let text = self.timed_request("generate_feedback", &prompt, None).await?;

        let text = non_empty_or(text, NO_FEEDBACK_TEXT, "generate_feedback");
        Ok(split_feedback(&text))
    }
}

fn non_empty_or(text: String, fallback: &str, operation: &str) -> String {
    if text.trim().is_empty() {
        log_llm_operation!(warn, operation, format!("empty model text, using '{}'", fallback));
        fallback.to_string()
    } else {
        text
    }
}

fn grading_prompt(answer_key: &str) -> String {
    let key = answer_key.trim();
    if key.is_empty() {
        GRADING_INSTRUCTION.to_string()
    } else {
        format!("Answer key:\n{}\n\n{}", key, GRADING_INSTRUCTION)
    }
}

fn feedback_prompt(student_name: &str, scores: &ExamScores) -> String {
    let score_lines = scores
        .entries()
        .iter()
        .map(|(exam, mark)| format!("{}: {}", exam, mark))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a teacher evaluating the performance of the student "{}", who has received the following exam scores:
{}

Write teacher-style feedback for each exam (UT1, CAT1, UT2, CAT2):
- Speak directly to the student using "I noticed", "You have", "You should", etc.
- Mention what they did well and what they need to improve.
- Feedback should be about 3-4 lines per exam.

At the end, include a general summary feedback (4-5 lines) commenting on the overall performance across all exams, again in the teacher's voice.

Format your output exactly like:
UT1: feedback text
CAT1: feedback text
UT2: feedback text
CAT2: feedback text
Overall: general feedback text"#,
        student_name, score_lines
    )
}
