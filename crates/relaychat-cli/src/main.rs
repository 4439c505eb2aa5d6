//! Relaychat CLI - terminal client for the streaming chat service
//!
//! A line-oriented chat loop over the relaychat-core session model. Session
//! history persists between runs in the platform data directory.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use console::style;

use relaychat_core::{
    AnonymousAuth, Author, AuthProvider, ChatClient, ClientConfig, FileStore, Session,
    SessionManager, StaticAuth,
};

#[derive(Parser)]
#[command(name = "relaychat")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Chat with the Relaychat assistant from the terminal", long_about = None)]
struct Cli {
    /// Path to a TOML config file (endpoints, storage key)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Access token; falls back to the RELAYCHAT_TOKEN environment variable
    #[arg(short, long)]
    token: Option<String>,

    /// Use the single request/response endpoint instead of streaming
    #[arg(long)]
    no_stream: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Warn level by default so logs don't interfere with the chat prompt
    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "info,relaychat_core=debug"
        } else {
            "warn"
        })
        .init();

    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    let token = cli.token.or_else(|| std::env::var("RELAYCHAT_TOKEN").ok());
    let auth: Arc<dyn AuthProvider> = match token {
        Some(token) => Arc::new(StaticAuth::new(token)),
        None => {
            eprintln!(
                "{}",
                style("No access token; pass --token or set RELAYCHAT_TOKEN").yellow()
            );
            Arc::new(AnonymousAuth)
        }
    };

    let client = ChatClient::new(config.clone(), auth)?;
    let store = Arc::new(FileStore::new(FileStore::default_dir()));
    let manager = SessionManager::new(store, &config.storage_key);
    if let Err(err) = manager.load() {
        tracing::debug!("no stored history ({err}); starting fresh");
    }

    run_chat(&manager, &client, !cli.no_stream).await
}

async fn run_chat(
    manager: &SessionManager,
    client: &ChatClient,
    streaming: bool,
) -> anyhow::Result<()> {
    println!(
        "{}",
        style("Relaychat - type a message, or /help for commands").dim()
    );
    print_history(&manager.active_session());

    let stdin = std::io::stdin();
    loop {
        print!("{} ", style(format!("[{}]", manager.active_session().name())).cyan());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(manager, command) {
                break;
            }
            continue;
        }

        let session = manager.active_session();
        session.send_message(client, line, streaming).await;
        if let Some(reply) = session.messages().into_iter().rev().find(|m| m.author == Author::Bot) {
            print_reply(&reply);
        }
    }

    manager.save();
    Ok(())
}

/// Returns false when the loop should exit.
fn handle_command(manager: &SessionManager, command: &str) -> bool {
    let (command, arg) = match command.split_once(' ') {
        Some((command, arg)) => (command, arg.trim()),
        None => (command, ""),
    };
    match command {
        "new" => {
            let session = manager.create_session();
            println!("Created {}", style(session.name()).green());
        }
        "list" => {
            let active = manager.active_session().name().to_string();
            for session in manager.sessions() {
                let marker = if session.name() == active { "*" } else { " " };
                println!(
                    "{marker} {} ({} messages)",
                    session.name(),
                    session.messages().len()
                );
            }
        }
        "switch" if !arg.is_empty() => {
            if manager.session(arg).is_some() {
                manager.set_active_session(arg);
                print_history(&manager.active_session());
            } else {
                eprintln!("{}", style(format!("No session named {arg:?}")).red());
            }
        }
        "delete" if !arg.is_empty() => match manager.remove_session(arg) {
            Ok(()) => println!("Deleted {arg}"),
            Err(err) => eprintln!("{}", style(err).red()),
        },
        "clear" => {
            manager.active_session().clean();
            println!("Cleared {}", manager.active_session().name());
        }
        "quit" | "exit" => return false,
        "help" => {
            println!("/new              start a new session");
            println!("/list             list sessions");
            println!("/switch <name>    switch the active session");
            println!("/delete <name>    delete a session");
            println!("/clear            clear the active session's messages");
            println!("/quit             save and exit");
        }
        other => eprintln!("{}", style(format!("Unknown command: /{other}")).red()),
    }
    true
}

fn print_history(session: &Session) {
    for message in session.messages() {
        match message.author {
            Author::User => println!("{} {}", style(">").cyan(), message.content),
            Author::Bot => print_reply(&message),
        }
    }
}

fn print_reply(message: &relaychat_core::Message) {
    if let Some(thought) = message.thought.as_deref().filter(|t| !t.is_empty()) {
        println!("{}", style(thought).dim());
    }
    println!("{}", message.content);
    for reference in &message.references {
        let name = reference.name.as_deref().unwrap_or("reference");
        match reference.url.as_deref() {
            Some(url) => println!("  {} {name} <{url}>", style("-").dim()),
            None => println!("  {} {name}", style("-").dim()),
        }
    }
}
