//! Terminal chat front end over the session engine.
//!
//! This module provides the pieces the `majlis-chat` binary is built from:
//!
//! - Streaming replies rendered into the terminal as they arrive
//! - Slash commands for creating, selecting, filing and deleting sessions
//! - Configurable model, persona, data directory and stream timeout
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: command handling over the directory and aggregator
//! - [`commands`]: Slash command parsing

mod commands;
mod config;
mod session;

pub use crate::display::TerminalSink;
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig, default_data_dir};
pub use session::{ChatSession, CommandReply, TerminalObserver};
