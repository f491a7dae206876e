use crate::session::{Level, Theme};
use std::collections::HashMap;

/// Names of the system templates. The string form doubles as the file stem
/// of an override in the prompts directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    ConversationDefault,
    ConversationBeginner,
    ConversationIntermediate,
    ConversationAdvanced,
    ProblemDefault,
    ProblemBeginner,
    ProblemIntermediate,
    ProblemAdvanced,
    Evaluation,
    EnhancedEvaluation,
    CulturalContext,
    ErrorAnalysis,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 12] = [
        TemplateKey::ConversationDefault,
        TemplateKey::ConversationBeginner,
        TemplateKey::ConversationIntermediate,
        TemplateKey::ConversationAdvanced,
        TemplateKey::ProblemDefault,
        TemplateKey::ProblemBeginner,
        TemplateKey::ProblemIntermediate,
        TemplateKey::ProblemAdvanced,
        TemplateKey::Evaluation,
        TemplateKey::EnhancedEvaluation,
        TemplateKey::CulturalContext,
        TemplateKey::ErrorAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::ConversationDefault => "conversation_default",
            TemplateKey::ConversationBeginner => "conversation_beginner",
            TemplateKey::ConversationIntermediate => "conversation_intermediate",
            TemplateKey::ConversationAdvanced => "conversation_advanced",
            TemplateKey::ProblemDefault => "problem_default",
            TemplateKey::ProblemBeginner => "problem_beginner",
            TemplateKey::ProblemIntermediate => "problem_intermediate",
            TemplateKey::ProblemAdvanced => "problem_advanced",
            TemplateKey::Evaluation => "evaluation",
            TemplateKey::EnhancedEvaluation => "enhanced_evaluation",
            TemplateKey::CulturalContext => "cultural_context",
            TemplateKey::ErrorAnalysis => "error_analysis",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == s)
    }

    fn builtin(&self) -> &'static str {
        match self {
            TemplateKey::ConversationDefault => include_str!("../prompts/conversation_default.md"),
            TemplateKey::ConversationBeginner => include_str!("../prompts/conversation_beginner.md"),
            TemplateKey::ConversationIntermediate => {
                include_str!("../prompts/conversation_intermediate.md")
            }
            TemplateKey::ConversationAdvanced => include_str!("../prompts/conversation_advanced.md"),
            TemplateKey::ProblemDefault => include_str!("../prompts/problem_default.md"),
            TemplateKey::ProblemBeginner => include_str!("../prompts/problem_beginner.md"),
            TemplateKey::ProblemIntermediate => include_str!("../prompts/problem_intermediate.md"),
            TemplateKey::ProblemAdvanced => include_str!("../prompts/problem_advanced.md"),
            TemplateKey::Evaluation => include_str!("../prompts/evaluation.md"),
            TemplateKey::EnhancedEvaluation => include_str!("../prompts/enhanced_evaluation.md"),
            TemplateKey::CulturalContext => include_str!("../prompts/cultural_context.md"),
            TemplateKey::ErrorAnalysis => include_str!("../prompts/error_analysis.md"),
        }
    }
}

/// What a system prompt is being rendered for.
///
/// A `level` of `None` stands for a level label that did not parse; those
/// requests use the level-agnostic default template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PromptRequest<'a> {
    Conversation {
        level: Option<Level>,
        theme: &'a Theme,
    },
    ProblemGeneration {
        level: Option<Level>,
        theme: &'a Theme,
    },
    Evaluation {
        problem: &'a str,
        answer: &'a str,
    },
    EnhancedEvaluation {
        problem: &'a str,
        answer: &'a str,
        level: Level,
    },
    CulturalContext {
        sentence: &'a str,
    },
    ErrorAnalysis {
        history: &'a str,
    },
}

/// The set of system templates, built-in or overridden from disk.
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    templates: HashMap<TemplateKey, String>,
}

impl PromptCatalog {
    pub fn builtin() -> Self {
        let templates = TemplateKey::ALL
            .into_iter()
            .map(|key| (key, key.builtin().to_string()))
            .collect();
        Self { templates }
    }

    /// Replaces built-in templates with the given `stem -> content` pairs.
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        for (name, content) in overrides {
            match TemplateKey::parse(&name) {
                Some(key) => {
                    tracing::info!("Using prompt override for {}", name);
                    self.templates.insert(key, content);
                }
                None => tracing::warn!("Ignoring unknown prompt template: {}", name),
            }
        }
        self
    }

    pub fn template(&self, key: TemplateKey) -> &str {
        self.templates
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.builtin())
    }

    /// Renders the system prompt for `request`. Pure: the same request always
    /// yields the same text.
    pub fn render(&self, request: &PromptRequest<'_>) -> String {
        match *request {
            PromptRequest::Conversation { level, theme } => {
                let key = match level {
                    Some(Level::Beginner) => TemplateKey::ConversationBeginner,
                    Some(Level::Intermediate) => TemplateKey::ConversationIntermediate,
                    Some(Level::Advanced) => TemplateKey::ConversationAdvanced,
                    None => TemplateKey::ConversationDefault,
                };
                fill(self.template(key), &[("theme", theme.as_str())])
            }
            PromptRequest::ProblemGeneration { level, theme } => {
                let key = match level {
                    Some(Level::Beginner) => TemplateKey::ProblemBeginner,
                    Some(Level::Intermediate) => TemplateKey::ProblemIntermediate,
                    Some(Level::Advanced) => TemplateKey::ProblemAdvanced,
                    None => TemplateKey::ProblemDefault,
                };
                fill(self.template(key), &[("theme", theme.as_str())])
            }
            PromptRequest::Evaluation { problem, answer } => fill(
                self.template(TemplateKey::Evaluation),
                &[("llm_text", problem), ("user_text", answer)],
            ),
            PromptRequest::EnhancedEvaluation {
                problem,
                answer,
                level,
            } => fill(
                self.template(TemplateKey::EnhancedEvaluation),
                &[
                    ("llm_text", problem),
                    ("user_text", answer),
                    ("level", level.label()),
                ],
            ),
            PromptRequest::CulturalContext { sentence } => fill(
                self.template(TemplateKey::CulturalContext),
                &[("sentence", sentence)],
            ),
            PromptRequest::ErrorAnalysis { history } => fill(
                self.template(TemplateKey::ErrorAnalysis),
                &[("conversation_history", history)],
            ),
        }
    }
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// Single pass: substituted values are never scanned for placeholders.
// Braces that do not name a known variable are copied through.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replacement = after.find('}').and_then(|end| {
            let name = &after[..end];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, end))
        });
        match replacement {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
