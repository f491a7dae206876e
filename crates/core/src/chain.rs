use crate::session::{Level, Mode, Theme};
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

// A chat-completion backend. `OpenAiClient` is the production implementation;
// tests use the generated `MockChatModel` or a scripted fake.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32) -> Result<String>;
}

const SUMMARY_PROMPT: &str = "Progressively summarize the lines of conversation provided, \
adding onto the previous summary and returning a new summary.";

/// Rough token count, about four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Conversation memory shared by every chain: a running summary plus the most
/// recent messages, kept under a token budget.
#[derive(Debug, Clone)]
pub struct SummaryMemory {
    summary: String,
    buffer: Vec<ChatMessage>,
    max_token_limit: usize,
}

impl SummaryMemory {
    pub fn new(max_token_limit: usize) -> Self {
        Self {
            summary: String::new(),
            buffer: Vec::new(),
            max_token_limit,
        }
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn buffer(&self) -> &[ChatMessage] {
        &self.buffer
    }

    pub fn buffered_tokens(&self) -> usize {
        self.buffer.iter().map(|m| estimate_tokens(&m.content)).sum()
    }

    /// Summary first (when there is one), then the buffered messages.
    pub fn context(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.buffer.len() + 1);
        if !self.summary.is_empty() {
            messages.push(ChatMessage::system(self.summary.clone()));
        }
        messages.extend(self.buffer.iter().cloned());
        messages
    }

    async fn save(
        &mut self,
        model: &dyn ChatModel,
        input: &str,
        output: &str,
        temperature: f32,
    ) -> Result<()> {
        self.buffer.push(ChatMessage::user(input));
        self.buffer.push(ChatMessage::assistant(output));

        let mut total = self.buffered_tokens();
        let mut prune = 0;
        while total > self.max_token_limit && prune < self.buffer.len() {
            total -= estimate_tokens(&self.buffer[prune].content);
            prune += 1;
        }
        if prune == 0 {
            return Ok(());
        }

        // The buffer is only trimmed once the new summary exists.
        let new_lines = self.buffer[..prune]
            .iter()
            .map(|m| match m.role {
                ChatRole::User => format!("Human: {}", m.content),
                _ => format!("AI: {}", m.content),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let request = format!(
            "Current summary:\n{}\n\nNew lines of conversation:\n{}\n\nNew summary:",
            self.summary, new_lines
        );
        let summary = model
            .complete(
                vec![ChatMessage::system(SUMMARY_PROMPT), ChatMessage::user(request)],
                temperature,
            )
            .await
            .context("Failed to summarize conversation memory")?;

        tracing::debug!("Folded {} messages into the memory summary", prune);
        self.summary = summary.trim().to_string();
        self.buffer.drain(..prune);
        Ok(())
    }
}

/// A system template bound to the shared memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    template: String,
}

impl Chain {
    pub fn template(&self) -> &str {
        &self.template
    }
}

pub struct ConversationEngine {
    model: Arc<dyn ChatModel>,
    memory: SummaryMemory,
    temperature: f32,
}

impl ConversationEngine {
    pub fn new(model: Arc<dyn ChatModel>, temperature: f32, max_token_limit: usize) -> Self {
        Self {
            model,
            memory: SummaryMemory::new(max_token_limit),
            temperature,
        }
    }

    pub fn create_chain(&self, system_template: impl Into<String>) -> Chain {
        Chain {
            template: system_template.into(),
        }
    }

    pub fn memory(&self) -> &SummaryMemory {
        &self.memory
    }

    /// Sends the chain's system prompt, the memory and `input` to the model,
    /// then records the exchange in memory.
    pub async fn predict(&mut self, chain: &Chain, input: &str) -> Result<String> {
        let mut messages = vec![ChatMessage::system(chain.template.clone())];
        messages.extend(self.memory.context());
        messages.push(ChatMessage::user(input));

        let reply = self
            .model
            .complete(messages, self.temperature)
            .await
            .context("Chat completion failed")?;

        self.memory
            .save(&*self.model, input, &reply, self.temperature)
            .await?;
        Ok(reply)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainPurpose {
    ProblemGeneration,
    Evaluation,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainKey {
    pub purpose: ChainPurpose,
    pub mode: Mode,
    pub level: Level,
    pub theme: Theme,
}

/// Keeps one chain per purpose and rebuilds it whenever its key or rendered
/// template changes.
#[derive(Debug, Default)]
pub struct ChainCache {
    entries: HashMap<ChainPurpose, (ChainKey, Chain)>,
}

impl ChainCache {
    pub fn bind(&mut self, engine: &ConversationEngine, key: ChainKey, template: String) -> Chain {
        match self.entries.get(&key.purpose) {
            Some((bound, chain)) if *bound == key && chain.template() == template => chain.clone(),
            _ => {
                tracing::debug!("Binding {:?} chain for {:?}", key.purpose, key);
                let chain = engine.create_chain(template);
                self.entries.insert(key.purpose, (key, chain.clone()));
                chain
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_predict_sends_system_memory_then_input() -> Result<()> {
        // Arrange
        let mut mock = MockChatModel::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_complete()
            .withf(|messages, temperature| {
                messages.len() == 2
                    && messages[0] == ChatMessage::system("tutor")
                    && messages[1] == ChatMessage::user("hello")
                    && *temperature == 0.5
            })
            .returning(|_, _| Box::pin(async move { Ok("Hi there".to_string()) }))
            .once()
            .in_sequence(&mut seq);
        mock.expect_complete()
            .withf(|messages, _| {
                messages.len() == 4
                    && messages[1] == ChatMessage::user("hello")
                    && messages[2] == ChatMessage::assistant("Hi there")
                    && messages[3] == ChatMessage::user("how are you")
            })
            .returning(|_, _| Box::pin(async move { Ok("Fine".to_string()) }))
            .once()
            .in_sequence(&mut seq);
        let mut engine = ConversationEngine::new(Arc::new(mock), 0.5, 1000);
        let chain = engine.create_chain("tutor");

        // Act
        let first = engine.predict(&chain, "hello").await?;
        let second = engine.predict(&chain, "how are you").await?;

        // Assert
        assert_eq!(first, "Hi there");
        assert_eq!(second, "Fine");
        assert_eq!(engine.memory().buffer().len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_over_budget_is_folded_into_summary() -> Result<()> {
        let mut mock = MockChatModel::new();
        mock.expect_complete()
            .withf(|messages, _| messages[0].content == "tutor")
            .returning(|_, _| Box::pin(async move { Ok("b".repeat(40)) }));
        mock.expect_complete()
            .withf(|messages, _| messages[0].content == SUMMARY_PROMPT)
            .returning(|messages, _| {
                let folded = messages[1].content.contains("Human: ");
                Box::pin(async move {
                    assert!(folded);
                    Ok(" learner greeted the tutor ".to_string())
                })
            })
            .once();
        // 10 tokens per message, so the second exchange overflows a budget of 25.
        let mut engine = ConversationEngine::new(Arc::new(mock), 0.5, 25);
        let chain = engine.create_chain("tutor");

        engine.predict(&chain, &"a".repeat(40)).await?;
        engine.predict(&chain, &"c".repeat(40)).await?;

        assert_eq!(engine.memory().summary(), "learner greeted the tutor");
        assert!(engine.memory().buffered_tokens() <= 25);
        assert_eq!(engine.memory().buffer().len(), 2);
        assert_eq!(engine.memory().context()[0], ChatMessage::system("learner greeted the tutor"));
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_failure_propagates_and_memory_is_unchanged() {
        let mut mock = MockChatModel::new();
        mock.expect_complete()
            .returning(|_, _| Box::pin(async move { Err(anyhow::anyhow!("503")) }));
        let mut engine = ConversationEngine::new(Arc::new(mock), 0.5, 1000);
        let chain = engine.create_chain("tutor");

        let result = engine.predict(&chain, "hello").await;

        assert!(result.is_err());
        assert!(engine.memory().buffer().is_empty());
    }

    #[test]
    fn test_chain_cache_rebuilds_on_key_or_template_change() {
        let mock = MockChatModel::new();
        let engine = ConversationEngine::new(Arc::new(mock), 0.5, 1000);
        let mut cache = ChainCache::default();
        let key = ChainKey {
            purpose: ChainPurpose::ProblemGeneration,
            mode: Mode::Dictation,
            level: Level::Beginner,
            theme: Theme::default(),
        };

        let first = cache.bind(&engine, key.clone(), "beginner".to_string());
        let same = cache.bind(&engine, key.clone(), "beginner".to_string());
        let advanced = cache.bind(
            &engine,
            ChainKey {
                level: Level::Advanced,
                ..key
            },
            "advanced".to_string(),
        );

        assert_eq!(first, same);
        assert_eq!(advanced.template(), "advanced");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
