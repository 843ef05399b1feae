use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use rustyline::DefaultEditor;

use pigeon_application::{PromptSet, TurnConfig, TurnEmitter, TurnOrchestrator};
use pigeon_core::{Message, MessageRole, PigeonConfig, TranscriptStore};
use pigeon_execution::{CommandExecutor, SafetyValidator, TcpMailbox};
use pigeon_interaction::OpenAiOracle;

const PROMPTS_DIR: &str = "./prompts";

/// The main entry point for the Pigeon REPL.
///
/// Sets up the turn orchestrator from environment configuration, restores
/// the persisted transcript, and runs a rustyline loop where each input
/// drives one streaming turn. Messages are printed as they are produced.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = PigeonConfig::from_env()?;

    // ===== Backend Initialization =====
    let store = TranscriptStore::new(&config.chat_dir)?;
    let transcript = store.load()?;

    let oracle = Arc::new(OpenAiOracle::from_config(&config));
    let validator = SafetyValidator::new(oracle.clone());
    let mailbox = Arc::new(TcpMailbox::new(config.mail.clone()));
    let executor = CommandExecutor::new(mailbox, config.session_timeout);
    let turn_config = TurnConfig {
        max_iterations: config.max_turn_iterations,
        command_concurrency: config.command_concurrency,
    };

    let orchestrator = Arc::new(TurnOrchestrator::new(
        oracle,
        validator,
        executor,
        store,
        transcript,
        turn_config,
    ));

    let prompts = PromptSet::load_from_dir(PROMPTS_DIR);
    orchestrator.ensure_seeded(&prompts).await?;

    // ===== REPL Setup =====
    let mut rl = DefaultEditor::new()?;

    println!("{}", "=== Pigeon ===".bright_magenta().bold());
    println!(
        "{}",
        "Your mailbox assistant. Type '/history' to review the transcript, 'quit' to exit."
            .bright_black()
    );
    println!();

    // ===== Main REPL Loop =====
    loop {
        let readline = rl.readline(">> ");

        match readline {
            Ok(line) => {
                let trimmed = line.trim();

                if trimmed == "quit" || trimmed == "exit" {
                    println!("{}", "Goodbye!".bright_green());
                    break;
                }
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&line);

                if trimmed == "/history" {
                    for message in orchestrator.snapshot().await.messages() {
                        print_message(message);
                    }
                    continue;
                }

                let (emitter, mut rx) = TurnEmitter::streaming();
                let turn_orchestrator = Arc::clone(&orchestrator);
                let input = trimmed.to_string();
                let turn = tokio::spawn(async move {
                    let result = turn_orchestrator.run_turn(&input, &emitter).await;
                    // Dropping the emitter here closes the stream.
                    result
                });

                while let Some(message) = rx.recv().await {
                    print_message(&message);
                }

                match turn.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => eprintln!("{}", format!("Turn failed: {err}").red()),
                    Err(err) => eprintln!("{}", format!("Turn panicked: {err}").red()),
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("{}", "CTRL-C detected. Type 'quit' to exit.".yellow());
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("{}", "CTRL-D detected. Exiting...".bright_green());
                break;
            }
            Err(err) => {
                eprintln!("{}", format!("Error: {err:?}").red());
                break;
            }
        }
    }

    Ok(())
}

fn print_message(message: &Message) {
    match message.role {
        MessageRole::User => println!("{}", format!("> {}", message.content).green()),
        MessageRole::Assistant => {
            for line in message.content.lines() {
                println!("{}", line.bright_blue());
            }
        }
        MessageRole::Developer => {
            for line in message.content.lines() {
                println!("{}", format!("  {line}").bright_black());
            }
        }
    }
    println!();
}
