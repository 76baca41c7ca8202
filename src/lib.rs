pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;

use application::commands::{AppState, restore_session_impl};
use clap::Parser;
use cli::{Cli, dispatch};
use std::path::PathBuf;
use std::process::ExitCode;

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = match cli.root.clone().map(PathBuf::from) {
        Some(root) => root,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(error) => {
                eprintln!("failed to resolve current directory: {error}");
                return ExitCode::FAILURE;
            }
        },
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let state = match AppState::new(workspace_root) {
            Ok(state) => state,
            Err(error) => {
                eprintln!("failed to initialize app state: {error}");
                return ExitCode::FAILURE;
            }
        };

        // Restore failures are logged; a revoked session has already been cleared.
        if let Err(error) = restore_session_impl(&state).await {
            state.log_error("restore_session", &error.to_string());
        }

        match dispatch(&state, cli.command).await {
            Ok(output) => {
                println!("{}", render(&output, cli.compact));
                ExitCode::SUCCESS
            }
            Err(message) => {
                eprintln!("{message}");
                ExitCode::FAILURE
            }
        }
    })
}

fn render(output: &serde_json::Value, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(output)
    } else {
        serde_json::to_string_pretty(output)
    };
    rendered.unwrap_or_else(|_| output.to_string())
}
