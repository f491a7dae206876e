//! Session state for one learner.
//!
//! Settings changes go through [`Session::reduce`], a pure reducer over
//! [`Control`] inputs. Turn progress is advanced by the sequencer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised when a setting cannot be parsed or validated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Unknown mode: {0}")]
    UnknownMode(String),
    #[error("Unknown level: {0}")]
    UnknownLevel(String),
    #[error("Unknown theme: {0}")]
    UnknownTheme(String),
    #[error("Invalid playback speed: {0}")]
    InvalidSpeed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Conversation,
    Shadowing,
    Dictation,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Conversation, Mode::Shadowing, Mode::Dictation];

    /// The label shown to learners and stored in the history file.
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Conversation => "日常英会話",
            Mode::Shadowing => "シャドーイング",
            Mode::Dictation => "ディクテーション",
        }
    }

    /// Accepts either the English name or the Japanese label.
    pub fn parse(s: &str) -> Result<Self, SessionError> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "conversation" | "日常英会話" => Ok(Mode::Conversation),
            "shadowing" | "シャドーイング" => Ok(Mode::Shadowing),
            "dictation" | "ディクテーション" => Ok(Mode::Dictation),
            _ => Err(SessionError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Beginner, Level::Intermediate, Level::Advanced];

    pub fn label(&self) -> &'static str {
        match self {
            Level::Beginner => "初級者",
            Level::Intermediate => "中級者",
            Level::Advanced => "上級者",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SessionError> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "beginner" | "初級者" => Ok(Level::Beginner),
            "intermediate" | "中級者" => Ok(Level::Intermediate),
            "advanced" | "上級者" => Ok(Level::Advanced),
            _ => Err(SessionError::UnknownLevel(s.to_string())),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The fixed catalog of conversation themes. The first entry is the default.
pub const THEMES: [&str; 12] = [
    "一般会話",
    "旅行",
    "ビジネス",
    "レストラン",
    "買い物",
    "趣味",
    "健康",
    "テクノロジー",
    "教育",
    "文化交流",
    "環境問題",
    "スポーツ",
];

/// A theme from [`THEMES`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Theme(String);

impl Theme {
    pub fn parse(s: &str) -> Result<Self, SessionError> {
        let s = s.trim();
        if THEMES.contains(&s) {
            Ok(Theme(s.to_string()))
        } else {
            Err(SessionError::UnknownTheme(s.to_string()))
        }
    }

    /// Looks a theme up by its 1-based position in the catalog.
    pub fn from_index(index: usize) -> Result<Self, SessionError> {
        index
            .checked_sub(1)
            .and_then(|i| THEMES.get(i))
            .map(|t| Theme(t.to_string()))
            .ok_or_else(|| SessionError::UnknownTheme(index.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Theme {
    fn default() -> Self {
        Theme(THEMES[0].to_string())
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Playback speed multiplier. Always positive and finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSpeed(f64);

impl PlaybackSpeed {
    /// Speeds offered by the front end, fastest first.
    pub const OPTIONS: [f64; 6] = [2.0, 1.5, 1.2, 1.0, 0.8, 0.6];

    pub fn new(value: f64) -> Result<Self, SessionError> {
        if value.is_finite() && value > 0.0 {
            Ok(PlaybackSpeed(value))
        } else {
            Err(SessionError::InvalidSpeed(value.to_string()))
        }
    }

    pub fn parse(s: &str) -> Result<Self, SessionError> {
        let value = s
            .trim()
            .parse::<f64>()
            .map_err(|_| SessionError::InvalidSpeed(s.trim().to_string()))?;
        Self::new(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_nominal(&self) -> bool {
        self.0 == 1.0
    }
}

impl Default for PlaybackSpeed {
    fn default() -> Self {
        PlaybackSpeed(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Assistant,
    User,
    /// A visual divider between exchanges.
    Separator,
}

/// One rendered entry of the on-screen transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub cultural_context: Option<String>,
}

impl Message {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            cultural_context: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            cultural_context: None,
        }
    }

    pub fn separator() -> Self {
        Self {
            role: Role::Separator,
            content: String::new(),
            cultural_context: None,
        }
    }

    pub fn with_cultural_context(mut self, context: Option<String>) -> Self {
        self.cultural_context = context;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    GeneratePrompt,
    /// A problem is out and the learner's answer has not been taken yet.
    AwaitingInput,
    /// The answer was taken and is being evaluated.
    Evaluating,
    Done,
}

/// Progress of a Shadowing or Dictation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Turn {
    pub stage: Stage,
    pub count: u32,
}

impl Turn {
    pub(crate) fn await_input(&mut self) {
        self.stage = Stage::AwaitingInput;
    }

    pub(crate) fn begin_evaluation(&mut self) {
        self.stage = Stage::Evaluating;
    }

    pub(crate) fn complete(&mut self) {
        self.stage = Stage::Done;
        self.count += 1;
    }
}

/// A generated practice sentence, kept until the turn completes.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub text: String,
    pub cultural_context: Option<String>,
}

/// Settings changes coming from the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    SelectMode(Mode),
    SelectLevel(Level),
    SelectTheme(Theme),
    SelectSpeed(PlaybackSpeed),
    ShowCulturalContext(bool),
    ShowErrorAnalysis(bool),
    Start,
    Pause,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub mode: Mode,
    pub level: Level,
    pub theme: Theme,
    pub speed: PlaybackSpeed,
    pub started: bool,
    pub show_cultural_context: bool,
    pub show_error_analysis: bool,
    pub shadowing: Turn,
    pub dictation: Turn,
    pub problem: Option<Problem>,
    pub last_user_input: Option<String>,
    transcript: Vec<Message>,
    conversation_counter: u32,
}

impl Session {
    pub fn new(mode: Mode, level: Level, theme: Theme, speed: PlaybackSpeed) -> Self {
        Self {
            mode,
            level,
            theme,
            speed,
            started: false,
            show_cultural_context: false,
            show_error_analysis: false,
            shadowing: Turn::default(),
            dictation: Turn::default(),
            problem: None,
            last_user_input: None,
            transcript: Vec::new(),
            conversation_counter: 0,
        }
    }

    /// Applies one settings change and returns the resulting session.
    pub fn reduce(mut self, control: Control) -> Session {
        match control {
            Control::SelectMode(mode) => {
                if mode != self.mode {
                    self.mode = mode;
                    self.started = false;
                    self.shadowing = Turn::default();
                    self.dictation = Turn::default();
                    self.problem = None;
                }
            }
            Control::SelectLevel(level) => self.level = level,
            Control::SelectTheme(theme) => self.theme = theme,
            Control::SelectSpeed(speed) => self.speed = speed,
            Control::ShowCulturalContext(on) => self.show_cultural_context = on,
            Control::ShowErrorAnalysis(on) => self.show_error_analysis = on,
            Control::Start => self.started = true,
            Control::Pause => self.started = false,
        }
        self
    }

    /// The turn tracked for `mode`; Conversation has none.
    pub fn turn(&self, mode: Mode) -> Option<&Turn> {
        match mode {
            Mode::Conversation => None,
            Mode::Shadowing => Some(&self.shadowing),
            Mode::Dictation => Some(&self.dictation),
        }
    }

    pub(crate) fn turn_mut(&mut self, mode: Mode) -> Option<&mut Turn> {
        match mode {
            Mode::Conversation => None,
            Mode::Shadowing => Some(&mut self.shadowing),
            Mode::Dictation => Some(&mut self.dictation),
        }
    }

    /// Whether a typed dictation answer is accepted.
    ///
    /// A submission that failed during evaluation leaves the gate open so
    /// the learner can resubmit.
    pub fn chat_open(&self) -> bool {
        self.mode == Mode::Dictation
            && matches!(
                self.dictation.stage,
                Stage::AwaitingInput | Stage::Evaluating
            )
    }

    /// Whether the shadowing turn has a problem out and is waiting for speech.
    pub fn shadowing_mid_capture(&self) -> bool {
        self.shadowing.stage == Stage::AwaitingInput
    }

    /// Whether the current mode offers a "next" button.
    pub fn next_button_visible(&self) -> bool {
        self.turn(self.mode)
            .is_some_and(|turn| turn.stage == Stage::Done)
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        self.transcript.push(message);
    }

    pub fn conversation_counter(&self) -> u32 {
        self.conversation_counter
    }

    pub(crate) fn bump_conversation_counter(&mut self) -> u32 {
        self.conversation_counter += 1;
        self.conversation_counter
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new(
            Mode::Conversation,
            Level::Beginner,
            Theme::default(),
            PlaybackSpeed::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_dictation() -> Session {
        let mut session = Session::default()
            .reduce(Control::SelectMode(Mode::Dictation))
            .reduce(Control::Start);
        session.dictation.await_input();
        session.dictation.count = 2;
        session.shadowing.count = 3;
        session
    }

    #[test]
    fn test_switching_mode_resets_turns_and_closes_gate() {
        // Arrange
        let mut session = started_dictation();
        session.push_message(Message::assistant("keep me"));
        assert!(session.chat_open());

        // Act
        let session = session.reduce(Control::SelectMode(Mode::Shadowing));

        // Assert
        assert!(!session.started);
        assert!(!session.chat_open());
        assert_eq!(session.dictation, Turn::default());
        assert_eq!(session.shadowing, Turn::default());
        assert_eq!(session.transcript().len(), 1, "transcript is never touched");
    }

    #[test]
    fn test_selecting_same_mode_is_a_no_op() {
        let session = started_dictation();
        let before = session.clone();

        let after = session.reduce(Control::SelectMode(Mode::Dictation));

        assert_eq!(after, before);
    }

    #[test]
    fn test_pause_stops_without_resetting() {
        let session = started_dictation().reduce(Control::Pause);
        assert!(!session.started);
        assert_eq!(session.dictation.count, 2);
    }

    #[test]
    fn test_next_button_follows_done_stage() {
        let mut session = Session::default().reduce(Control::SelectMode(Mode::Shadowing));
        assert!(!session.next_button_visible());

        session.shadowing.complete();

        assert!(session.next_button_visible());
        assert_eq!(session.shadowing.count, 1);
    }

    #[test]
    fn test_theme_catalog_lookup() {
        assert_eq!(Theme::default().as_str(), "一般会話");
        assert_eq!(Theme::from_index(2).unwrap().as_str(), "旅行");
        assert!(Theme::from_index(0).is_err());
        assert!(Theme::from_index(13).is_err());
        assert!(matches!(
            Theme::parse("宇宙旅行"),
            Err(SessionError::UnknownTheme(_))
        ));
    }

    #[test]
    fn test_speed_must_be_positive() {
        assert!(PlaybackSpeed::new(0.0).is_err());
        assert!(PlaybackSpeed::new(-1.0).is_err());
        assert!(PlaybackSpeed::new(f64::INFINITY).is_err());
        assert!(PlaybackSpeed::parse("abc").is_err());
        assert_eq!(PlaybackSpeed::parse(" 1.5 ").unwrap().value(), 1.5);
        assert!(PlaybackSpeed::default().is_nominal());
    }

    #[test]
    fn test_mode_and_level_accept_both_labels() {
        assert_eq!(Mode::parse("Dictation").unwrap(), Mode::Dictation);
        assert_eq!(Mode::parse("シャドーイング").unwrap(), Mode::Shadowing);
        assert_eq!(Level::parse("上級者").unwrap(), Level::Advanced);
        assert!(Level::parse("expert").is_err());
    }
}
