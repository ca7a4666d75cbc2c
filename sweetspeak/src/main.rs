//! `SweetSpeak` terminal client.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sweetspeak -- alice
//! cargo run --bin sweetspeak -- bob 69f542 --chat-with alice
//! ```
//!
//! Type `/chat <name>` to open a chat, plain lines to talk, `/quit` to leave.

use std::path::Path;

use clap::Parser;
use sweetspeak::client::{Client, ClientError, ClientEvent};
use sweetspeak::config::ClientCliArgs;
use sweetspeak::input::{self, Command};
use sweetspeak_proto::connection::ConnectionOptions;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = ClientCliArgs::parse();

    // Stdout belongs to the chat, so logs go to a file.
    let _log_guard = init_logging(&cli.log_level, &cli.log_path());

    let identity = cli.identity();
    println!("connecting to {} as {}...", cli.server, identity.name);

    let mut client = match Client::connect_with_retry(
        &cli.server,
        identity,
        &cli.retry_policy(),
        ConnectionOptions::default(),
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    println!("connected. /chat <name> to start a chat, /quit to leave.");

    if let Some(peer) = cli.chat_with.as_deref()
        && let Err(e) = client.request_chat(peer).await
    {
        eprintln!("Error: {e}");
    }

    run(&mut client).await;
    client.close().await;
}

fn init_logging(level: &str, log_path: &Path) -> Option<WorkerGuard> {
    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Interleaves stdin lines with server events until either side ends.
async fn run(client: &mut Client) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read stdin");
                        break;
                    }
                };
                match Command::parse(&line) {
                    Command::Quit => break,
                    Command::Nothing => {}
                    Command::Chat(name) => {
                        if let Err(e) = client.request_chat(&name).await {
                            eprintln!("Error: {e}");
                        }
                    }
                    Command::Say(text) => match client.send_text(&text).await {
                        Ok(()) => {}
                        Err(ClientError::NoChat) => println!("no chat open; use /chat <name>"),
                        Err(e) => eprintln!("Error: {e}"),
                    },
                }
            }
            event = client.next_event() => {
                let Some(event) = event else {
                    println!("disconnected from server");
                    break;
                };
                show(&event);
            }
        }
    }
}

fn show(event: &ClientEvent) {
    match event {
        ClientEvent::ChatOpened { users, .. } => {
            let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
            println!("-- chat opened: {} --", names.join(" and "));
        }
        ClientEvent::UserNotFound(name) => println!("-- no user named {name} --"),
        ClientEvent::PeerNotConnected(name) => println!("-- {name} is not connected --"),
        ClientEvent::Message(message) => println!("{}", input::format_message(message)),
    }
}
