mod audio_device;
mod config;
mod console;
mod prompt_loader;

use crate::audio_device::CpalAudioDevice;
use crate::config::{COMMAND_CHANNEL_SIZE, Config};
use crate::console::{ConsoleReader, Input, parse_input};
use anyhow::{Context, Result};
use clap::Parser;
use eikaiwa_core::Command;
use eikaiwa_core::chain::ConversationEngine;
use eikaiwa_core::history::HistoryStore;
use eikaiwa_core::openai::{OpenAiClient, OpenAiModels};
use eikaiwa_core::prompts::PromptCatalog;
use eikaiwa_core::sequencer::{Outcome, SessionSequencer, Trigger};
use eikaiwa_core::session::{Control, Level, Mode, PlaybackSpeed, Session, Theme};
use eikaiwa_core::speech::{LocalSpeechBridge, ScratchDirs};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Voice-driven English conversation practice")]
struct Cli {
    /// Practice mode: conversation, shadowing or dictation
    #[arg(long, default_value = "conversation")]
    mode: String,
    /// English level: beginner, intermediate or advanced
    #[arg(long, default_value = "beginner")]
    level: String,
    /// Conversation theme, by name or 1-based number
    #[arg(long)]
    theme: Option<String>,
    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
    /// Show cultural context for AI sentences
    #[arg(long)]
    culture: bool,
    /// Show error-pattern analysis
    #[arg(long)]
    analysis: bool,
    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,
}

impl Cli {
    fn session(&self) -> Result<Session> {
        let theme = match &self.theme {
            Some(theme) => match theme.parse::<usize>() {
                Ok(index) => Theme::from_index(index)?,
                Err(_) => Theme::parse(theme)?,
            },
            None => Theme::default(),
        };
        let mut session = Session::new(
            Mode::parse(&self.mode)?,
            Level::parse(&self.level)?,
            theme,
            PlaybackSpeed::new(self.speed)?,
        );
        session.show_cultural_context = self.culture;
        session.show_error_analysis = self.analysis;
        Ok(session)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting eikaiwa...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if args.list_devices {
        print_devices();
        return Ok(());
    }
    let session = args.session().context("Invalid session settings")?;

    // --- 4. Load Prompts ---
    let mut prompts = PromptCatalog::builtin();
    if let Some(dir) = &config.prompts_dir {
        let overrides = prompt_loader::load_prompts(dir).context("Failed to load prompt overrides")?;
        tracing::info!("Loaded {} prompt overrides from {}", overrides.len(), dir.display());
        prompts = prompts.with_overrides(overrides);
    }

    // --- 5. Initialize API Clients ---
    let models = OpenAiModels {
        chat: config.chat_model,
        transcription: config.transcription_model,
        speech: config.speech_model,
    };
    let mut client = OpenAiClient::new(config.openai_api_key, models);
    if let Some(base_url) = config.openai_base_url {
        tracing::info!("Using OpenAI-compatible endpoint at {}", base_url);
        client = client.with_base_url(base_url);
    }
    let client = Arc::new(client);

    // --- 6. Application Setup ---
    let scratch = ScratchDirs::create(&config.audio_input_dir, &config.audio_output_dir)
        .context("Failed to create audio scratch directories")?;
    let reader = Arc::new(ConsoleReader::stdin());
    let device = Arc::new(CpalAudioDevice::new(
        config.input_device,
        config.output_device,
        reader.clone(),
    ));
    let speech = Arc::new(LocalSpeechBridge::new(client.clone(), device, scratch));
    let engine = ConversationEngine::new(client, config.chat_temperature, config.memory_token_limit);
    let history = HistoryStore::new(config.history_path);
    tracing::info!("Practice history is kept in {}", history.path().display());

    // Create the command channel to decouple core logic from the terminal.
    let (command_tx, mut command_rx) = mpsc::channel::<Command>(COMMAND_CHANNEL_SIZE);
    let render_handle = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            println!("{}", console::render_command(&command));
        }
    });

    // Front-end notices share the channel so they print after earlier sequencer output.
    let notices = command_tx.clone();
    let mut sequencer = SessionSequencer::new(session, prompts, engine, speech, history, command_tx);

    notify(&notices, console::HELP.to_string()).await;
    notify(&notices, console::render_settings(sequencer.session())).await;

    // --- 7. Main Loop ---
    while let Some(line) = reader.read_line().await? {
        let input = match parse_input(&line) {
            Ok(input) => input,
            Err(e) => {
                notify(&notices, e.to_string()).await;
                continue;
            }
        };

        match input {
            Input::Quit => break,
            Input::Help => {
                notify(&notices, console::HELP.to_string()).await;
                notify(&notices, console::render_options()).await;
            }
            Input::Devices => print_devices(),
            Input::History(n) => {
                let text = match sequencer.review_history(n).await {
                    Ok(review) => console::render_review(&review),
                    Err(e) => {
                        tracing::error!("History review failed: {:#}", e);
                        format!("エラーが発生しました: {e:#}")
                    }
                };
                notify(&notices, text).await;
            }
            Input::Control(control) => {
                let start = control == Control::Start;
                sequencer.apply(control);
                notify(&notices, console::render_settings(sequencer.session())).await;
                if start {
                    run_activation(&mut sequencer, &notices, Trigger::Render).await;
                }
            }
            Input::Trigger(trigger) => run_activation(&mut sequencer, &notices, trigger).await,
        }
    }

    // Dropping every sender closes the command channel and ends the render task.
    drop(sequencer);
    drop(notices);
    render_handle.await?;
    tracing::info!("Session ended.");
    Ok(())
}

/// Activates the sequencer, repeating with `Trigger::Render` while it asks for a re-render.
async fn run_activation(
    sequencer: &mut SessionSequencer,
    notices: &mpsc::Sender<Command>,
    trigger: Trigger,
) {
    let mut trigger = trigger;
    loop {
        let result = sequencer.activate(trigger).await;
        match &result {
            Ok(Outcome::Aborted) => tracing::info!("Activation aborted: nothing was recorded"),
            Err(e) => tracing::error!("Activation failed: {:#}", e),
            Ok(_) => {}
        }
        if let Some(notice) = console::activation_notice(&result, sequencer.session().started) {
            notify(notices, notice).await;
        }
        match result {
            Ok(Outcome::Rerender) => trigger = Trigger::Render,
            _ => break,
        }
    }
}

async fn notify(notices: &mpsc::Sender<Command>, text: String) {
    if let Err(e) = notices.send(Command::Notice(text)).await {
        tracing::warn!("Render task is gone, dropping notice: {:?}", e);
    }
}

fn print_devices() {
    match eikaiwa_native_utils::device::get_available_inputs() {
        Ok(inputs) => println!("Input devices:\n{inputs}"),
        Err(e) => tracing::error!("Failed to list input devices: {:#}", e),
    }
    match eikaiwa_native_utils::device::get_available_outputs() {
        Ok(outputs) => println!("Output devices:\n{outputs}"),
        Err(e) => tracing::error!("Failed to list output devices: {:#}", e),
    }
}
