//! Terminal front end: line parsing and message rendering.

use anyhow::Result;
use eikaiwa_core::Command;
use eikaiwa_core::sequencer::{DEFAULT_REVIEW_ENTRIES, HistoryReview, Outcome, Trigger};
use eikaiwa_core::session::{
    Control, Level, Message, Mode, PlaybackSpeed, Role, Session, SessionError, THEMES, Theme,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

pub const HELP: &str = "\
Commands:
  /mode <conversation|shadowing|dictation>   switch practice mode
  /level <beginner|intermediate|advanced>    switch English level
  /theme <name|number>                       switch conversation theme
  /speed <2.0|1.5|1.2|1.0|0.8|0.6>           playback speed
  /culture on|off                            show cultural context
  /analysis on|off                           show error analysis
  /start, /pause                             start or pause practice
  /next                                      next problem (shadowing, dictation)
  /history [n]                               review recent history
  /devices                                   list audio devices
  /help, /quit
Press Enter to record or continue. Any other text is submitted as a dictation answer.";

/// One parsed line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Control(Control),
    Trigger(Trigger),
    History(usize),
    Devices,
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Missing argument for {0}")]
    MissingArgument(&'static str),
    #[error("Expected on or off, got: {0}")]
    InvalidToggle(String),
    #[error("Invalid count: {0}")]
    InvalidCount(String),
}

pub fn parse_input(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Trigger(Trigger::Render));
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Trigger(Trigger::Submit(line.to_string())));
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (command, None),
    };

    let input = match name {
        "mode" => Input::Control(Control::SelectMode(Mode::parse(required(arg, "/mode")?)?)),
        "level" => Input::Control(Control::SelectLevel(Level::parse(required(arg, "/level")?)?)),
        "theme" => {
            let arg = required(arg, "/theme")?;
            let theme = match arg.parse::<usize>() {
                Ok(index) => Theme::from_index(index)?,
                Err(_) => Theme::parse(arg)?,
            };
            Input::Control(Control::SelectTheme(theme))
        }
        "speed" => Input::Control(Control::SelectSpeed(PlaybackSpeed::parse(required(
            arg, "/speed",
        )?)?)),
        "culture" => Input::Control(Control::ShowCulturalContext(toggle(required(
            arg, "/culture",
        )?)?)),
        "analysis" => Input::Control(Control::ShowErrorAnalysis(toggle(required(
            arg,
            "/analysis",
        )?)?)),
        "start" => Input::Control(Control::Start),
        "pause" => Input::Control(Control::Pause),
        "next" => Input::Trigger(Trigger::Next),
        "history" => match arg {
            Some(n) => Input::History(
                n.parse::<usize>()
                    .map_err(|_| InputError::InvalidCount(n.to_string()))?,
            ),
            None => Input::History(DEFAULT_REVIEW_ENTRIES),
        },
        "devices" => Input::Devices,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => return Err(InputError::UnknownCommand(other.to_string())),
    };
    Ok(input)
}

fn required<'a>(arg: Option<&'a str>, command: &'static str) -> Result<&'a str, InputError> {
    arg.ok_or(InputError::MissingArgument(command))
}

fn toggle(arg: &str) -> Result<bool, InputError> {
    match arg.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(InputError::InvalidToggle(arg.to_string())),
    }
}

/// Formats one sequencer notice for the terminal.
pub fn render_command(command: &Command) -> String {
    match command {
        Command::Render(message) => render_message(message),
        Command::Status(status) => format!("… {status}"),
        Command::ChatOpened => {
            "AIが読み上げた音声を、そのまま入力・送信してください。".to_string()
        }
        Command::NextAvailable(mode) => format!("/next で次の{}へ進みます。", mode.label()),
        Command::Notice(text) => text.clone(),
    }
}

/// What to tell the learner after one activation, if anything.
pub fn activation_notice(result: &Result<Outcome>, started: bool) -> Option<String> {
    match result {
        Ok(Outcome::Idle) if !started => Some("/start で練習を開始してください。".to_string()),
        Ok(Outcome::Aborted) => Some("音声が録音されませんでした。".to_string()),
        Err(e) => Some(format!("エラーが発生しました: {e:#}")),
        Ok(_) => None,
    }
}

fn render_message(message: &Message) -> String {
    match message.role {
        Role::Assistant => match &message.cultural_context {
            Some(context) => format!("AI> {}\n    [文化的コンテキスト] {}", message.content, context),
            None => format!("AI> {}", message.content),
        },
        Role::User => format!("You> {}", message.content),
        Role::Separator => "-".repeat(40),
    }
}

pub fn render_settings(session: &Session) -> String {
    format!(
        "[{}] レベル: {} / テーマ: {} / 速度: {}x / 文化: {} / 分析: {} / {}",
        session.mode.label(),
        session.level.label(),
        session.theme,
        session.speed.value(),
        on_off(session.show_cultural_context),
        on_off(session.show_error_analysis),
        if session.started { "実行中" } else { "停止中" },
    )
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

/// Lists the selectable modes, levels, speeds and themes.
pub fn render_options() -> String {
    let labels = |items: Vec<&str>| items.join(" / ");
    let themes = THEMES
        .iter()
        .enumerate()
        .map(|(i, theme)| format!("  {:>2}. {}", i + 1, theme))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Modes: {}\nLevels: {}\nSpeeds: {}\nThemes:\n{}",
        labels(Mode::ALL.iter().map(|m| m.label()).collect()),
        labels(Level::ALL.iter().map(|l| l.label()).collect()),
        PlaybackSpeed::OPTIONS
            .iter()
            .map(|s| format!("{s}x"))
            .collect::<Vec<_>>()
            .join(" / "),
        themes
    )
}

pub fn render_review(review: &HistoryReview) -> String {
    if review.entries.is_empty() {
        return "会話履歴がありません。".to_string();
    }
    let mut out: Vec<String> = review
        .entries
        .iter()
        .map(|entry| {
            let mut block = format!(
                "{} [{} / {} / {}]\n  You: {}\n  AI: {}",
                entry.timestamp,
                entry.mode,
                entry.english_level,
                entry.theme,
                entry.user_input,
                entry.ai_response
            );
            if let Some(evaluation) = &entry.evaluation {
                block.push_str(&format!("\n  評価: {evaluation}"));
            }
            block
        })
        .collect();
    if let Some(analysis) = &review.analysis {
        out.push(format!("エラーパターン分析:\n{analysis}"));
    }
    out.join("\n\n")
}

/// Stdin lines shared by the command loop and the recording stop gesture.
pub struct ConsoleReader {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleReader {
    pub fn stdin() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Next line, or `None` at end of input.
    pub async fn read_line(&self) -> Result<Option<String>> {
        let mut lines = self.lines.lock().await;
        Ok(lines.next_line().await?)
    }
}
