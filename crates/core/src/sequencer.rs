//! Drives one activation of the practice loop.
//!
//! [`plan`] is a pure function from the session and the incoming trigger to
//! the [`Step`] to run. [`SessionSequencer::activate`] executes that step
//! against the speech bridge, the conversation engine and the history store,
//! reporting progress and rendered messages as [`Command`]s.

use crate::Command;
use crate::chain::{ChainCache, ChainKey, ChainPurpose, ConversationEngine};
use crate::history::{HistoryEntry, HistoryStore, format_for_analysis};
use crate::prompts::{PromptCatalog, PromptRequest};
use crate::session::{Control, Message, Mode, Problem, Session, Stage};
use crate::speech::SpeechBridge;
use crate::voice::{Voice, select_voice};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Every this many conversation turns an error-pattern analysis is shown.
pub const ERROR_ANALYSIS_INTERVAL: u32 = 10;
/// Entries shown by a history review when no count is given.
pub const DEFAULT_REVIEW_ENTRIES: usize = 5;

const STATUS_GENERATING_PROBLEM: &str = "問題文生成中...";
const STATUS_EVALUATING: &str = "評価結果の生成中...";
const STATUS_TRANSCRIBING: &str = "音声入力をテキストに変換中...";
const STATUS_PREPARING_REPLY: &str = "回答の音声読み上げ準備中...";
const STATUS_CULTURAL_CONTEXT: &str = "文化的コンテキストを取得中...";
const STATUS_ANALYZING: &str = "会話パターンを分析中...";

/// What woke the sequencer up.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// A re-render: start/record gesture or the follow-up to `Outcome::Rerender`.
    Render,
    /// The per-mode "next" button.
    Next,
    /// A typed dictation answer.
    Submit(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Idle,
    PresentDictationProblem,
    EvaluateDictation(String),
    ShadowingRound { fresh_problem: bool },
    ConversationTurn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to do for this trigger.
    Idle,
    /// The capture was empty; session state is unchanged past that point.
    Aborted,
    /// The step finished and the front end should activate again with `Trigger::Render`.
    Rerender,
    Completed,
}

/// Decides which step a trigger runs.
pub fn plan(session: &Session, trigger: &Trigger) -> Step {
    if !session.started {
        return Step::Idle;
    }
    if let Trigger::Submit(answer) = trigger {
        return if session.chat_open() {
            Step::EvaluateDictation(answer.clone())
        } else {
            Step::Idle
        };
    }
    let next = *trigger == Trigger::Next;

    match session.mode {
        Mode::Dictation => {
            let turn = session.dictation;
            let gated = next || turn.count == 0;
            match turn.stage {
                Stage::GeneratePrompt | Stage::Done if gated => Step::PresentDictationProblem,
                _ => Step::Idle,
            }
        }
        Mode::Shadowing => {
            let mid_capture = session.shadowing_mid_capture();
            if next || session.shadowing.count == 0 || mid_capture {
                Step::ShadowingRound {
                    fresh_problem: !mid_capture || session.problem.is_none(),
                }
            } else {
                Step::Idle
            }
        }
        Mode::Conversation if !next => Step::ConversationTurn,
        Mode::Conversation => Step::Idle,
    }
}

/// Whether the `counter`-th conversation turn is followed by an error analysis.
pub fn error_analysis_due(counter: u32) -> bool {
    counter > 0 && counter % ERROR_ANALYSIS_INTERVAL == 0
}

/// Result of the "analyze conversation history" control.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryReview {
    pub entries: Vec<HistoryEntry>,
    pub analysis: Option<String>,
}

pub struct SessionSequencer {
    session: Session,
    prompts: PromptCatalog,
    engine: ConversationEngine,
    speech: Arc<dyn SpeechBridge>,
    history: HistoryStore,
    chains: ChainCache,
    command_tx: mpsc::Sender<Command>,
}

impl SessionSequencer {
    pub fn new(
        session: Session,
        prompts: PromptCatalog,
        engine: ConversationEngine,
        speech: Arc<dyn SpeechBridge>,
        history: HistoryStore,
        command_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            session,
            prompts,
            engine,
            speech,
            history,
            chains: ChainCache::default(),
            command_tx,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn apply(&mut self, control: Control) {
        tracing::info!("Applying {:?}", control);
        self.session = std::mem::take(&mut self.session).reduce(control);
    }

    /// Runs the step planned for `trigger`.
    ///
    /// Errors are returned after whatever state changes already happened; no
    /// rollback is attempted.
    pub async fn activate(&mut self, trigger: Trigger) -> Result<Outcome> {
        let step = plan(&self.session, &trigger);
        tracing::debug!("{:?} in {:?} -> {:?}", trigger, self.session.mode, step);
        match step {
            Step::Idle => Ok(Outcome::Idle),
            Step::PresentDictationProblem => self.present_dictation_problem().await,
            Step::EvaluateDictation(answer) => self.evaluate_dictation(answer).await,
            Step::ShadowingRound { fresh_problem } => self.shadowing_round(fresh_problem).await,
            Step::ConversationTurn => self.conversation_turn().await,
        }
    }

    /// The last `n` history entries, plus an error-pattern analysis of them
    /// when error analysis display is on.
    pub async fn review_history(&mut self, n: usize) -> Result<HistoryReview> {
        let entries = self.history.recent(n);
        let analysis = if self.session.show_error_analysis && !entries.is_empty() {
            Some(self.analyze_errors(&entries).await?)
        } else {
            None
        };
        Ok(HistoryReview { entries, analysis })
    }

    async fn present_dictation_problem(&mut self) -> Result<Outcome> {
        let text = self.generate_problem().await?;
        self.speak_problem(&text).await?;
        self.session.problem = Some(Problem {
            text,
            cultural_context: None,
        });
        self.session.dictation.await_input();
        self.send(Command::ChatOpened).await;
        tracing::info!("Dictation problem presented, waiting for the typed answer");
        Ok(Outcome::Rerender)
    }

    async fn evaluate_dictation(&mut self, answer: String) -> Result<Outcome> {
        let problem = self.current_problem()?;
        self.session.dictation.begin_evaluation();
        self.session.last_user_input = Some(answer.clone());

        self.finish_round(Mode::Dictation, &problem, &answer).await?;
        tracing::info!("Dictation turn {} complete", self.session.dictation.count);
        Ok(Outcome::Rerender)
    }

    async fn shadowing_round(&mut self, fresh_problem: bool) -> Result<Outcome> {
        if fresh_problem {
            let text = self.generate_problem().await?;
            self.speak_problem(&text).await?;
            self.session.problem = Some(Problem {
                text,
                cultural_context: None,
            });
            self.problem_cultural_context().await?;
        } else {
            tracing::info!("Resuming shadowing capture for the current problem");
        }
        self.session.shadowing.await_input();

        let Some(clip) = self.speech.record().await? else {
            tracing::info!("Empty capture, shadowing turn stays open");
            return Ok(Outcome::Aborted);
        };
        self.status(STATUS_TRANSCRIBING).await;
        let spoken = self.speech.transcribe(clip).await?;
        self.session.last_user_input = Some(spoken.clone());
        self.session.shadowing.begin_evaluation();

        let problem = self.current_problem()?;
        self.finish_round(Mode::Shadowing, &problem, &spoken).await?;
        tracing::info!("Shadowing turn {} complete", self.session.shadowing.count);
        Ok(Outcome::Rerender)
    }

    // Shared tail of a shadowing or dictation turn: render, evaluate, persist, advance.
    async fn finish_round(&mut self, mode: Mode, problem: &Problem, answer: &str) -> Result<()> {
        let context = self.problem_cultural_context().await?;
        self.render(Message::assistant(problem.text.clone()).with_cultural_context(context))
            .await;
        self.render(Message::user(answer)).await;

        let evaluation = self.evaluate(&problem.text, answer).await?;
        self.render(Message::assistant(evaluation.clone())).await;
        self.render(Message::separator()).await;

        self.history.append(HistoryEntry::record(
            &self.session,
            answer,
            problem.text.clone(),
            Some(evaluation),
        ))?;

        if let Some(turn) = self.session.turn_mut(mode) {
            turn.complete();
        }
        self.session.problem = None;
        self.send(Command::NextAvailable(mode)).await;
        Ok(())
    }

    async fn conversation_turn(&mut self) -> Result<Outcome> {
        let template = self.prompts.render(&PromptRequest::Conversation {
            level: Some(self.session.level),
            theme: &self.session.theme,
        });
        let chain = self.engine.create_chain(template);

        let Some(clip) = self.speech.record().await? else {
            tracing::info!("Empty capture, conversation turn skipped");
            return Ok(Outcome::Aborted);
        };
        self.status(STATUS_TRANSCRIBING).await;
        let spoken = self.speech.transcribe(clip).await?;
        self.session.last_user_input = Some(spoken.clone());
        self.render(Message::user(spoken.clone())).await;

        self.status(STATUS_PREPARING_REPLY).await;
        let reply = self.engine.predict(&chain, &spoken).await?;
        let context = if self.session.show_cultural_context {
            Some(self.cultural_context(&reply).await?)
        } else {
            None
        };

        let voice = select_voice(&reply);
        let audio = self.speech.synthesize(&reply, voice).await?;
        self.speech.playback(audio, self.session.speed).await?;
        self.render(Message::assistant(reply.clone()).with_cultural_context(context))
            .await;

        self.history
            .append(HistoryEntry::record(&self.session, spoken, reply, None))?;
        let counter = self.session.bump_conversation_counter();
        tracing::info!("Conversation turn {} complete (voice {})", counter, voice.as_str());

        if self.session.show_error_analysis && error_analysis_due(counter) {
            let recent = self.history.recent(ERROR_ANALYSIS_INTERVAL as usize);
            if !recent.is_empty() {
                let analysis = self.analyze_errors(&recent).await?;
                self.render(Message::assistant(format!("### 会話パターン分析\n{analysis}")))
                    .await;
                self.render(Message::separator()).await;
            }
        }
        Ok(Outcome::Completed)
    }

    async fn generate_problem(&mut self) -> Result<String> {
        self.status(STATUS_GENERATING_PROBLEM).await;
        let template = self.prompts.render(&PromptRequest::ProblemGeneration {
            level: Some(self.session.level),
            theme: &self.session.theme,
        });
        let key = self.chain_key(ChainPurpose::ProblemGeneration);
        let chain = self.chains.bind(&self.engine, key, template);
        let problem = self.engine.predict(&chain, "").await?;
        Ok(problem.trim().to_string())
    }

    // Problems are always read with the neutral voice.
    async fn speak_problem(&self, text: &str) -> Result<()> {
        let audio = self.speech.synthesize(text, Voice::Alloy).await?;
        self.speech.playback(audio, self.session.speed).await
    }

    async fn evaluate(&mut self, problem: &str, answer: &str) -> Result<String> {
        self.status(STATUS_EVALUATING).await;
        let template = self.prompts.render(&PromptRequest::EnhancedEvaluation {
            problem,
            answer,
            level: self.session.level,
        });
        let key = self.chain_key(ChainPurpose::Evaluation);
        let chain = self.chains.bind(&self.engine, key, template);
        self.engine.predict(&chain, "").await
    }

    async fn cultural_context(&mut self, sentence: &str) -> Result<String> {
        self.status(STATUS_CULTURAL_CONTEXT).await;
        let template = self
            .prompts
            .render(&PromptRequest::CulturalContext { sentence });
        let chain = self.engine.create_chain(template);
        self.engine.predict(&chain, "").await
    }

    // Fetched once per problem and kept with it.
    async fn problem_cultural_context(&mut self) -> Result<Option<String>> {
        if !self.session.show_cultural_context {
            return Ok(None);
        }
        let Some(problem) = self.session.problem.as_ref() else {
            return Ok(None);
        };
        if let Some(context) = &problem.cultural_context {
            return Ok(Some(context.clone()));
        }
        let sentence = problem.text.clone();
        let context = self.cultural_context(&sentence).await?;
        if let Some(problem) = self.session.problem.as_mut() {
            problem.cultural_context = Some(context.clone());
        }
        Ok(Some(context))
    }

    async fn analyze_errors(&mut self, entries: &[HistoryEntry]) -> Result<String> {
        self.status(STATUS_ANALYZING).await;
        let history = format_for_analysis(entries);
        let template = self
            .prompts
            .render(&PromptRequest::ErrorAnalysis { history: &history });
        let chain = self.engine.create_chain(template);
        self.engine.predict(&chain, "").await
    }

    fn current_problem(&self) -> Result<Problem> {
        self.session
            .problem
            .clone()
            .ok_or_else(|| anyhow!("No problem has been presented for this turn"))
    }

    fn chain_key(&self, purpose: ChainPurpose) -> ChainKey {
        ChainKey {
            purpose,
            mode: self.session.mode,
            level: self.session.level,
            theme: self.session.theme.clone(),
        }
    }

    async fn render(&mut self, message: Message) {
        self.session.push_message(message.clone());
        self.send(Command::Render(message)).await;
    }

    async fn status(&self, text: &str) {
        self.send(Command::Status(text.to_string())).await;
    }

    async fn send(&self, command: Command) {
        if let Err(e) = self.command_tx.send(command).await {
            tracing::warn!("Failed to send command to the front end: {:?}", e);
        }
    }
}
