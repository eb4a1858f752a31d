//! Prompt assembly and the language model seam.


use tracing::debug;

use crate::Result;
use crate::database::SearchResult;
use crate::memory::Turn;

const INSTRUCTIONS: &str = "You are an assistant answering questions about city council agendas and minutes. \
Use only the context passages below and the earlier conversation. \
If the context does not contain the answer, say that you do not know. \
Mention the source document when you rely on it.";

/// Text generation backend.
///
/// An unreachable backend or a timeout is reported as
/// [`crate::RagError::ModelUnavailable`].
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt`, returning the raw model output
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Builds grounded prompts and sends them to a [`LanguageModel`]
pub struct AnsweringEngine {
    model: Box<dyn LanguageModel>,
}

impl AnsweringEngine {
    #[inline]
    pub fn new(model: Box<dyn LanguageModel>) -> Self {
        Self { model }
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Answer `question` from the retrieved chunks and prior turns.
    ///
    /// The model output is returned verbatim. No retries happen here.
    #[inline]
    pub fn answer(
        &self,
        question: &str,
        retrieved: &[SearchResult],
        history: &[&Turn],
    ) -> Result<String> {
        let prompt = build_prompt(question, retrieved, history);
        debug!(
            "Sending prompt of {} chars ({} passages, {} prior turns) to {}",
            prompt.len(),
            retrieved.len(),
            history.len(),
            self.model.model_name()
        );
        self.model.generate(&prompt)
    }
}

/// Instructions, then history oldest first, then passages in retrieval
/// order, then the question.
#[inline]
pub fn build_prompt(question: &str, retrieved: &[SearchResult], history: &[&Turn]) -> String {
    let conversation = if history.is_empty() {
        String::new()
    } else {
        let turns: String = history
            .iter()
            .map(|turn| format!("User: {}\nAssistant: {}\n", turn.question, turn.answer))
            .collect();
        format!("\nConversation so far:\n{}", turns)
    };

    let passages: String = if retrieved.is_empty() {
        "(no matching passages)\n".to_string()
    } else {
        retrieved
            .iter()
            .enumerate()
            .map(|(i, result)| {
                format!(
                    "[{}] {}\n{}\n\n",
                    i + 1,
                    result.metadata.citation(),
                    result.metadata.content.trim()
                )
            })
            .collect()
    };

    format!(
        "{}\n{}\nContext:\n{}\nQuestion: {}\nAnswer:",
        INSTRUCTIONS, conversation, passages, question
    )
}
