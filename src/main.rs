use std::path::PathBuf;

use clap::Parser;
use randchat_lib::commands::{parse_line, Command, HELP};
use randchat_lib::config::{ClientConfig, INTERESTS};
use randchat_lib::dispatch::{Exit, Intent};
use randchat_lib::events::{ClientEvent, Emitter};
use randchat_lib::session::MessageOrigin;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::error;

#[derive(Parser, Debug)]
#[command(author, version, about = "Anonymous chat with optional audio calls", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Matching server WebSocket URL, overrides the config file
    #[arg(short, long)]
    server: Option<String>,

    /// Interest to match on; repeat for several
    #[arg(short, long = "interest")]
    interests: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if !args.interests.is_empty() {
        config.interests = args.interests.into_iter().collect();
    }
    randchat_lib::logger::init(&config.logging)?;

    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    let (emitter, mut events) = Emitter::channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_line(&line) {
                Some(Command::Intent(intent)) => {
                    let quit = intent == Intent::Quit;
                    if intent_tx.send(intent).is_err() || quit {
                        break;
                    }
                }
                Some(Command::Help) => {
                    println!("{HELP}");
                    println!("known interests: {}", INTERESTS.join(", "));
                }
                Some(Command::Unknown(name)) => println!("unknown command /{name}, try /help"),
                None => {}
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = render(&event) {
                println!("{line}");
            }
        }
    });

    match randchat_lib::run(config, intent_rx, emitter).await {
        Ok(Exit::Quit) => Ok(()),
        Ok(Exit::ChannelLost) => Err("connection to the server was lost".into()),
        Err(e) => {
            error!(error = %e, "client failed");
            Err(e.into())
        }
    }
}

fn render(event: &ClientEvent) -> Option<String> {
    let now = chrono::Local::now().format("%H:%M");
    let line = match event {
        ClientEvent::StatusChanged(status) => format!("* {status:?}"),
        ClientEvent::Matched { .. } => "* you are now chatting with a stranger".to_owned(),
        ClientEvent::Message { text, origin } => match origin {
            MessageOrigin::Local => format!("[{now}] you: {text}"),
            MessageOrigin::Remote => format!("[{now}] stranger: {text}"),
        },
        ClientEvent::OnlineCount(n) => format!("* {n} online"),
        ClientEvent::IncomingCall { .. } => "* incoming call, /accept or /reject".to_owned(),
        ClientEvent::CallRequested { .. } => "* calling...".to_owned(),
        ClientEvent::CallAccepted { .. } => "* call accepted, connecting".to_owned(),
        ClientEvent::CallNegotiating { .. } => return None,
        ClientEvent::CallActive { .. } => "* call connected".to_owned(),
        ClientEvent::CallDuration { seconds } => {
            if seconds % 60 != 0 {
                return None;
            }
            format!("* call {:02}:{:02}", seconds / 60, seconds % 60)
        }
        ClientEvent::CallConnectionProblem => "* call connection unstable".to_owned(),
        ClientEvent::CallConnectionRecovered => "* call connection recovered".to_owned(),
        ClientEvent::MuteChanged { muted } => {
            if *muted {
                "* microphone muted".to_owned()
            } else {
                "* microphone on".to_owned()
            }
        }
        ClientEvent::CallEnded { reason } => format!("* call ended ({reason:?})"),
        ClientEvent::CallFailed { reason } => format!("! {reason}"),
        ClientEvent::ChannelLost => "! lost connection to the server".to_owned(),
    };
    Some(line)
}
