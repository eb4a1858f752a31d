//! One conversational session: retrieve, answer, remember.


use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::answering::{AnsweringEngine, LanguageModel};
use crate::config::Config;
use crate::database::lancedb::{SearchResult, VectorStore};
use crate::database::sqlite::Database;
use crate::embeddings::Embedder;
use crate::memory::{ConversationMemory, Turn};
use crate::ollama::OllamaClient;
use crate::{RagError, Result};

/// Answer to one question plus the passages it was grounded on
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Retrieved passages, most similar first
    pub sources: Vec<SearchResult>,
}

pub struct QueryDriver {
    embedder: Box<dyn Embedder>,
    engine: AnsweringEngine,
    store: Arc<RwLock<VectorStore>>,
    memory: ConversationMemory,
    top_k: usize,
}

impl QueryDriver {
    #[inline]
    pub fn new(
        embedder: Box<dyn Embedder>,
        model: Box<dyn LanguageModel>,
        store: Arc<RwLock<VectorStore>>,
        top_k: usize,
        max_turns: usize,
    ) -> Self {
        Self {
            embedder,
            engine: AnsweringEngine::new(model),
            store,
            memory: ConversationMemory::new(max_turns),
            top_k,
        }
    }

    /// Open the index and connect to Ollama for both embeddings and answers.
    ///
    /// Fails with a configuration error if nothing has been ingested yet or
    /// the index was built with a different embedding model. Nothing is
    /// created on disk.
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let catalog = Database::open_existing(config).await?;
        catalog
            .require_manifest(
                &config.ollama.embedding_model,
                config.ollama.embedding_dimension,
            )
            .await?;

        let store = VectorStore::open_existing(config).await?;
        let client = OllamaClient::new(&config.ollama)?;

        Ok(Self::new(
            Box::new(client.clone()),
            Box::new(client),
            Arc::new(RwLock::new(store)),
            config.retrieval.top_k,
            config.memory.max_turns,
        ))
    }

    /// Ask one question in this session.
    ///
    /// On success the turn is appended to the session memory. On any
    /// failure the memory is left as it was.
    #[inline]
    pub async fn ask(&mut self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::Config("Question must not be empty".to_string()));
        }

        let query_vector = self.embedder.embed_query(question)?;
        let sources = self.store.read().await.query(&query_vector, self.top_k).await?;
        debug!("Retrieved {} passages for question", sources.len());

        let history = self.memory.render();
        let text = self.engine.answer(question, &sources, &history)?;

        self.memory.append(Turn::new(question, text.clone()));
        info!(
            "Answered question with {} passages ({} turns in session)",
            sources.len(),
            self.memory.len()
        );

        Ok(Answer { text, sources })
    }

    /// The running conversation, oldest turn first
    #[inline]
    pub fn history(&self) -> Vec<&Turn> {
        self.memory.render()
    }

    /// Forget the conversation so far
    #[inline]
    pub fn reset(&mut self) {
        self.memory.clear();
    }
}
