//! Interactive multi-session chat in the terminal.
//!
//! Sessions are kept under the data directory and survive restarts. Replies stream in as they
//! are generated.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings
//! MAJLIS_API_KEY=... majlis-chat
//!
//! # Keep sessions somewhere else
//! majlis-chat --data-dir ./sessions
//!
//! # Give up on a reply after 30 idle seconds
//! majlis-chat --timeout-secs 30
//!
//! # Disable colors (useful for piping output)
//! majlis-chat --no-color
//!
//! # Log engine activity to stderr
//! MAJLIS_LOG=majlis=debug majlis-chat
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/new`, `/list`, `/select <n>`, `/delete [n]` - Manage sessions
//! - `/category <name> [n]` - File a session under a category
//! - `/name [display name]` - Set or clear the name the assistant uses for you
//! - `/history` - Reprint the current session
//! - `/quit` - Exit the application

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use majlis::backend::MessagesBackend;
use majlis::chat::{
    ChatArgs, ChatConfig, ChatSession, CommandReply, TerminalObserver, TerminalSink,
    parse_command,
};
use majlis::{SessionDirectory, SessionStore, StreamOutcome, StreamingAggregator};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "MAJLIS_LOG";

/// Main entry point for the majlis-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("majlis-chat [OPTIONS]");
    let config = ChatConfig::from(args);
    let use_color = config.use_color;

    let store = SessionStore::open_dir(&config.data_dir)?;
    let directory = SessionDirectory::open(store, TerminalObserver::with_color(use_color));
    let backend = MessagesBackend::with_options(None, config.base_url.as_deref(), None)?
        .with_model(config.model.clone())
        .with_max_tokens(config.max_tokens)
        .with_web_search(config.web_search);
    let aggregator = Arc::new(StreamingAggregator::new(
        directory.shared(),
        Arc::new(backend),
        config.aggregator_config(),
    ));
    let session = ChatSession::new(Arc::clone(&aggregator), use_color);
    let mut sink = TerminalSink::with_color(use_color);
    let mut rl = DefaultEditor::new()?;

    // Ctrl+C while a reply is streaming stops the reply, not the program.
    let interrupt = Arc::clone(&aggregator);
    ctrlc::set_handler(move || {
        interrupt.cancel_all();
    })?;

    println!("Majlis (model: {}, data: {})", config.model, config.data_dir.display());
    println!("Type /help for commands, /quit to exit\n");
    sink.print_info(&session.current_banner());

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                if let Some(command) = parse_command(line) {
                    match session.handle(command) {
                        Ok(CommandReply::Continue(lines)) => {
                            for line in lines {
                                sink.print_info(&format!("    {line}"));
                            }
                        }
                        Ok(CommandReply::Quit) => {
                            println!("Goodbye!");
                            break;
                        }
                        Err(err) => sink.print_warning(&err.to_string()),
                    }
                    continue;
                }

                println!("Majlis:");
                match session.send(line, &mut sink).await {
                    Ok(StreamOutcome::Discarded) => {
                        sink.print_warning("the reply arrived after its session was closed")
                    }
                    Ok(_) => {}
                    Err(err) => sink.print_warning(&err.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                sink.print_warning(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}
