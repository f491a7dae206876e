pub mod chain;
pub mod history;
pub mod openai;
pub mod prompts;
pub mod sequencer;
pub mod session;
pub mod speech;
pub mod voice;

use session::{Message, Mode};

/// Notices the sequencer sends to the front end.
///
/// Keeps the sequencer free of any knowledge about how messages are shown.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Show a message that was just appended to the transcript.
    Render(Message),
    /// A progress notice for a slow remote call.
    Status(String),
    /// A dictation problem was read out; typed answers are accepted now.
    ChatOpened,
    /// The turn finished and the mode's "next" button is available.
    NextAvailable(Mode),
    /// Text from the front end itself, shown in order with the rest.
    Notice(String),
}
