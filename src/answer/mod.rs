//! Answer generation from retrieved context
//!
//! The generator is asked for a short extracted answer, or the single-space
//! sentinel [`NO_ANSWER`] when the context does not contain one. The sentinel
//! is what the semantic classifier treats as an abstention, so generated text
//! is passed on untrimmed.

use anyhow::Result;
use async_trait::async_trait;

pub mod openai;

pub use openai::OpenAIGenerator;

/// Answer meaning "not derivable from the context"
pub const NO_ANSWER: &str = " ";

/// System instruction for answer extraction
pub const SYSTEM_PROMPT: &str = "Analyze the question type (e.g., when, who, what, how many) and \
provide a direct answer in the appropriate format. For date questions, respond with a date. For \
numerical questions, respond with a number. For factual questions, provide just the fact. Extract \
only the most relevant information from the context to answer the question precisely. Keep your \
answer as simple and concise as possible. The context consists of one or more conversation \
excerpts; read all of them before answering. If you cannot find the answer in the context, \
respond with a single space: \" \"";

/// User turn carrying the question and the retrieved passages
pub fn build_user_prompt(question: &str, context: &[String]) -> String {
    format!(
        "Question: {}\n\nContext:\n{}\n\nAnswer:\n",
        question,
        context.join("\n\n")
    )
}

/// Trait for answer generators
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Answer `question` from `context`; may return [`NO_ANSWER`]
    async fn generate(&self, question: &str, context: &[String]) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}
