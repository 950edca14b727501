//! Front end commands.
//!
//! Each line typed in the terminal front end becomes a [`Command`]; plain text
//! is a chat message. [`dispatch`] runs a command against the widget and turns
//! failures into a [`CommandError`] carrying the user-facing message.

use crate::error::ErrorKind;
use crate::playback::PlaybackOutcome;
use crate::recorder::format_progress;
use crate::widget::{Widget, WidgetError};

/// Error shown to the user for a failed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub message: String,
    pub error_type: String,
}

impl From<WidgetError> for CommandError {
    fn from(err: WidgetError) -> Self {
        let kind = err.kind();
        let error_type = match kind {
            ErrorKind::Configuration => "config",
            ErrorKind::Permission | ErrorKind::DeviceNotFound | ErrorKind::DeviceBusy => "audio",
            ErrorKind::EmptyRecording | ErrorKind::EmptyTranscript | ErrorKind::PayloadTooLarge => {
                "input"
            }
            ErrorKind::Timeout => "timeout",
            ErrorKind::Authentication | ErrorKind::RateLimited | ErrorKind::Service => "service",
            ErrorKind::Network => "network",
            ErrorKind::InvalidState => "state",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        log::debug!("Command failed: {}", err);
        let message = match &err {
            WidgetError::UnknownMessage(_) => err.to_string(),
            _ => kind.user_message().to_string(),
        };
        Self {
            message,
            error_type: error_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open,
    Close,
    Minimize,
    FullScreen,
    NewChat,
    Record,
    Stop,
    Continue,
    Cancel,
    Accept,
    /// Play a message by 1-based position in the conversation or by id
    Play(String),
    Levels,
    Show,
    Help,
    Quit,
    /// Send what is in the input buffer (a transcript)
    Submit,
    /// Send this text
    Send(String),
    Unknown(String),
}

impl Command {
    /// Parse one input line. A blank line submits the input buffer.
    pub fn parse(line: &str) -> Command {
        let line = line.trim();
        if line.is_empty() {
            return Command::Submit;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Send(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name {
            "open" => Command::Open,
            "close" => Command::Close,
            "min" | "minimize" => Command::Minimize,
            "full" | "fullscreen" => Command::FullScreen,
            "new" => Command::NewChat,
            "rec" | "record" => Command::Record,
            "stop" => Command::Stop,
            "more" | "continue" => Command::Continue,
            "cancel" => Command::Cancel,
            "send" | "accept" => Command::Accept,
            "play" if !arg.is_empty() => Command::Play(arg.to_string()),
            "levels" => Command::Levels,
            "show" => Command::Show,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

impl Command {
    /// Whether the command waits on a remote service. The front end runs these
    /// in the background so `/cancel`, `/close` and `/new` stay reachable.
    pub fn is_long_running(&self) -> bool {
        matches!(
            self,
            Command::Accept | Command::Play(_) | Command::Submit | Command::Send(_)
        )
    }
}

pub const HELP: &str = "\
Type a message and press Enter to send it.
  /open /close       open or close the widget (close keeps the conversation)
  /min /full         minimize, toggle full screen
  /new               start a new chat
  /rec /stop         start or stop voice recording
  /more              keep recording after the 2:00 limit
  /send /cancel      transcribe the recording, or discard it
  /play <n|id>       play or pause a bot message
  /levels /show      input levels, redraw the conversation
  /quit";

/// What the front end should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// Print this line
    Notice(String),
    /// Redraw the conversation
    Render,
    Quit,
}

fn resolve_message_id(widget: &Widget, target: &str) -> Result<String, WidgetError> {
    let messages = widget.view()?.messages;
    if let Ok(position) = target.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|i| messages.get(i))
            .map(|m| m.id.clone())
            .ok_or_else(|| WidgetError::UnknownMessage(target.to_string()));
    }
    Ok(target.to_string())
}

fn level_bar(levels: &[f32]) -> String {
    const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    levels
        .iter()
        .map(|level| {
            let index = ((level / 100.0) * (BARS.len() - 1) as f32).round() as usize;
            BARS[index.min(BARS.len() - 1)]
        })
        .collect()
}

pub async fn dispatch(widget: &Widget, command: Command) -> Result<CommandReply, CommandError> {
    let reply = match command {
        Command::Open => {
            let open = widget.toggle_open()?;
            CommandReply::Notice(if open { "Widget open" } else { "Widget closed" }.to_string())
        }
        Command::Close => {
            widget.close()?;
            CommandReply::Notice("Widget closed".to_string())
        }
        Command::Minimize => {
            let minimized = widget.toggle_minimize()?;
            CommandReply::Notice(if minimized { "Minimized" } else { "Restored" }.to_string())
        }
        Command::FullScreen => {
            let mode = widget.toggle_fullscreen()?;
            CommandReply::Notice(format!("Display mode: {}", mode.as_str()))
        }
        Command::NewChat => {
            widget.new_chat()?;
            CommandReply::Render
        }
        Command::Record => {
            widget.start_voice()?;
            CommandReply::Notice("Recording... /stop when done".to_string())
        }
        Command::Stop => {
            widget.stop_voice()?;
            let secs = widget.voice().total_duration_secs();
            CommandReply::Notice(format!(
                "Stopped at {}. /send to transcribe, /cancel to discard",
                format_progress(secs)
            ))
        }
        Command::Continue => {
            widget.continue_voice()?;
            CommandReply::Notice("Recording continues".to_string())
        }
        Command::Cancel => {
            widget.cancel_voice();
            CommandReply::Notice("Recording discarded".to_string())
        }
        Command::Accept => {
            let transcript = widget.accept_voice().await?;
            CommandReply::Notice(format!(
                "Transcript ready, press Enter to send: {}",
                transcript
            ))
        }
        Command::Play(target) => {
            let id = resolve_message_id(widget, &target)?;
            match widget.play_message(&id).await? {
                PlaybackOutcome::Started => CommandReply::Notice("Playing".to_string()),
                PlaybackOutcome::Paused => CommandReply::Notice("Paused".to_string()),
            }
        }
        Command::Levels => match widget.voice().levels() {
            Some(levels) => CommandReply::Notice(format!(
                "{} {}",
                level_bar(&levels),
                format_progress(widget.voice().segment_duration_secs())
            )),
            None => CommandReply::Notice("Not recording".to_string()),
        },
        Command::Show => CommandReply::Render,
        Command::Help => CommandReply::Notice(HELP.to_string()),
        Command::Quit => CommandReply::Quit,
        Command::Submit => {
            widget.submit().await?;
            CommandReply::Render
        }
        Command::Send(text) => {
            widget.set_input(text)?;
            widget.submit().await?;
            CommandReply::Render
        }
        Command::Unknown(line) => CommandReply::Notice(format!("Unknown command: {}", line)),
    };
    Ok(reply)
}
