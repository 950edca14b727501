pub mod audio_capture;
pub mod chat;
pub mod commands;
pub mod error;
pub mod history;
pub mod level_meter;
pub mod playback;
pub mod recorder;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod stt;
pub mod tts;
pub mod voice;
pub mod widget;


use audio_capture::{get_default_input_device_info, list_input_devices, CpalInput};
use clap::Parser;
use commands::{Command, CommandError, CommandReply};
use history::Sender;
use playback::RodioOutput;
use recorder::{format_progress, RecorderState, MAX_RECORDING_SECS};
use settings::{DisplayMode, WidgetSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use widget::{Widget, WidgetView};

pub use error::ErrorKind;

#[derive(Parser, Debug)]
#[command(name = "voicechat", version, about = "Voice chat widget in the terminal")]
pub struct Cli {
    /// Directory for chat history and display mode
    #[arg(long, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Display mode used when none has been saved (popup or full-screen)
    #[arg(long, value_name = "MODE")]
    pub display_mode: Option<DisplayMode>,

    /// Settings file to load instead of the one in the data directory
    #[arg(long, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Microphone to record from (default input device when omitted)
    #[arg(long, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// List input devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

fn render(view: &WidgetView) {
    println!();
    println!(
        "── {} chat ({}{}) ──",
        if view.is_open { "Open" } else { "Closed" },
        view.display_mode.as_str(),
        if view.is_minimized { ", minimized" } else { "" }
    );
    if !view.has_started_chat() {
        println!("  How can I help you today?");
    }
    for (i, message) in view.messages.iter().enumerate() {
        let who = match message.sender {
            Sender::User => "You".to_string(),
            Sender::Bot => match &message.agent {
                Some(agent) => format!("Bot ({})", agent),
                None => "Bot".to_string(),
            },
        };
        let playing = if view.now_playing.as_deref() == Some(message.id.as_str()) {
            " ♪"
        } else if view.generating.contains(&message.id) {
            " (preparing audio)"
        } else {
            ""
        };
        println!(
            "{:>3}. [{}] {}: {}{}",
            i + 1,
            message.timestamp,
            who,
            message.text,
            playing
        );
    }
    if !view.input.is_empty() {
        println!("  > {}", view.input);
    }
}

/// Report the automatic stop at the recording ceiling.
fn watch_recorder(widget: &Arc<Widget>) {
    let Some(mut state_rx) = widget.voice().subscribe() else {
        return;
    };
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            if *state_rx.borrow_and_update() == RecorderState::LimitReached {
                println!(
                    "Recording limit reached ({}). /more to keep going, /send to transcribe, /cancel to discard",
                    format_progress(MAX_RECORDING_SECS)
                );
            }
        }
    });
}

fn report(widget: &Widget, reply: Result<CommandReply, CommandError>) {
    match reply {
        Ok(CommandReply::Notice(text)) => println!("{}", text),
        Ok(CommandReply::Render) => match widget.view() {
            Ok(view) => render(&view),
            Err(e) => log::error!("Failed to read widget state: {}", e),
        },
        Ok(CommandReply::Quit) => {}
        Err(e) => println!("Error: {}", e.message),
    }
}

async fn repl<R>(widget: Arc<Widget>, input: R)
where
    R: AsyncBufRead + Unpin,
{
    watch_recorder(&widget);
    widget.toggle_open().ok();
    if let Ok(view) = widget.view() {
        render(&view);
    }
    println!("{}", commands::HELP);

    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read input: {}", e);
                break;
            }
        };

        let command = Command::parse(&line);
        if command.is_long_running() {
            let widget = widget.clone();
            tokio::spawn(async move {
                let reply = commands::dispatch(&widget, command).await;
                report(&widget, reply);
            });
            continue;
        }

        let reply = commands::dispatch(&widget, command).await;
        if reply == Ok(CommandReply::Quit) {
            break;
        }
        report(&widget, reply);
    }

    widget.shutdown();
}

pub fn run() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.list_devices {
        let default = get_default_input_device_info().map(|(name, _, _)| name);
        for name in list_input_devices() {
            let marker = if Some(&name) == default.as_ref() { " (default)" } else { "" };
            println!("{}{}", name, marker);
        }
        return;
    }

    let mut settings = match WidgetSettings::load(cli.settings.as_deref(), cli.data_dir.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(mode) = cli.display_mode {
        settings.display_mode = mode;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let output = match RodioOutput::new() {
        Ok(output) => output,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    log::info!("Data directory: {}", settings.data_dir().display());
    runtime.block_on(async move {
        let widget = Arc::new(Widget::from_settings(
            &settings,
            Box::new(CpalInput::new(cli.input_device)),
            Arc::new(output),
        ));
        repl(widget, BufReader::new(tokio::io::stdin())).await;
    });
}
