//! Dossier CLI - chat with a local document
//!
//! The application logic is contained in lib.rs, and this file is responsible
//! for parsing arguments, driving the interactive loop, and handling
//! top-level errors.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::Input;
use dossier::session::{Session, SessionController};
use dossier::transcript::Role;
use dossier::{CompletionGateway, Config, OpenRouterGateway};

#[derive(Parser)]
#[command(name = "dossier")]
#[command(author, version, about = "Chat with a local document through an LLM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a document, print its summary, then answer questions interactively
    Chat {
        /// File to talk about (txt, pdf, csv, xlsx)
        file: PathBuf,
    },
    /// Upload a document and ask a single question
    Ask {
        /// File to talk about (txt, pdf, csv, xlsx)
        file: PathBuf,
        /// The question to ask
        question: String,
    },
    /// Show the extracted plain text without contacting the LLM
    Extract {
        /// File to extract
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat { file } => {
            let config = Config::load()?;
            let gateway = OpenRouterGateway::from_config(&config)?;
            let controller =
                SessionController::new(gateway, &config.agent.persona, config.extract.table_row_cap);
            let mut session = controller.new_session();

            upload_file(&controller, &mut session, &file).await?;
            print_latest_reply(&session);

            loop {
                let line: String = Input::new()
                    .with_prompt("Ask something about the file (/quit to exit)")
                    .allow_empty(true)
                    .interact_text()?;
                let line = line.trim().to_string();

                match line.as_str() {
                    "" => continue,
                    "/quit" => break,
                    "/remove" => {
                        controller.remove(&mut session);
                        println!("{}", "File removed, session reset.".yellow());
                        break;
                    }
                    question => {
                        println!("{}", "Thinking...".dimmed());
                        match controller.ask(&mut session, question).await {
                            Ok(reply) => println!("\n{reply}\n"),
                            Err(e) => eprintln!("{} {e}", "Error:".red()),
                        }
                    }
                }
            }
        }
        Commands::Ask { file, question } => {
            let config = Config::load()?;
            let gateway = OpenRouterGateway::from_config(&config)?;
            let controller =
                SessionController::new(gateway, &config.agent.persona, config.extract.table_row_cap);
            let mut session = controller.new_session();

            upload_file(&controller, &mut session, &file).await?;
            print_latest_reply(&session);

            println!("{}", "Thinking...".dimmed());
            let reply = controller.ask(&mut session, &question).await?;
            println!("\n{reply}");
        }
        Commands::Extract { file } => {
            let config = Config::load()?;
            let filename = file_name(&file)?;
            let bytes = std::fs::read(&file)?;
            let extraction =
                dossier::extract::extract(&filename, bytes, config.extract.table_row_cap)?;

            println!("{}", extraction.text);
            println!(
                "\n--- Extracted {} characters ---",
                extraction.text.chars().count()
            );
            if extraction.skipped_rows > 0 {
                println!(
                    "{}",
                    format!(
                        "Note: table truncated, {} rows not included.",
                        extraction.skipped_rows
                    )
                    .yellow()
                );
            }
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| anyhow::anyhow!("not a file path: {}", path.display()))
}

/// Read the file, run upload + one-time summarisation, and report progress.
async fn upload_file<G: CompletionGateway>(
    controller: &SessionController<G>,
    session: &mut Session,
    path: &Path,
) -> anyhow::Result<()> {
    let filename = file_name(path)?;
    let bytes = std::fs::read(path)?;

    println!("{}", format!("📎 File uploaded: {filename}").green());
    println!("{}", "Summarizing file...".dimmed());
    controller.upload(session, &filename, bytes).await?;

    if let Some(doc) = session.document() {
        if doc.skipped_rows > 0 {
            println!(
                "{}",
                format!(
                    "Note: only the first rows were read, {} rows not included.",
                    doc.skipped_rows
                )
                .yellow()
            );
        }
    }
    Ok(())
}

/// Print the most recent assistant message from the display snapshot.
fn print_latest_reply(session: &Session) {
    if let Some(message) = session
        .transcript()
        .for_display()
        .into_iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
    {
        println!("\n{}\n", message.content);
    }
}
