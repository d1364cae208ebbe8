//! CLI entry point for the biograph-chat assistant.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use biograph_core::{ConversationId, Settings};
use biograph_chat::{SessionError, SessionManager};

/// Asked by `--smoke-test` to check the whole pipeline end to end.
const SMOKE_TEST_QUERY: &str =
    "What is the GWAS p-value for the association between childhood-onset asthma and RORA?";

#[derive(Parser)]
#[command(name = "biograph-chat")]
#[command(about = "Biomedical question answering grounded in a Neo4j knowledge graph")]
struct Cli {
    /// Answer one question and exit.
    #[arg(short, long)]
    query: Option<String>,

    /// Run the system check question after startup.
    #[arg(long)]
    smoke_test: bool,

    /// Print each answer once it is complete instead of streaming it.
    #[arg(long)]
    no_stream: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,

    /// Config file prefix (default: biograph).
    #[arg(short, long, default_value = "biograph")]
    config: String,
}

/// How a single answer ended.
enum Outcome {
    Answered,
    Cancelled,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let settings = Arc::new(Settings::load_from(&cli.config)?);
    let manager = SessionManager::live(settings);
    let conversation_id = ConversationId::new();

    eprintln!("Connecting to the knowledge graph and model...");
    manager.start(conversation_id).await?;
    eprintln!("Ready.");

    let result = run(&cli, &manager, conversation_id).await;
    manager.shutdown_all().await;
    result
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: &Cli, manager: &SessionManager, id: ConversationId) -> anyhow::Result<()> {
    let stream = !cli.no_stream;

    if cli.smoke_test {
        println!("Query: {SMOKE_TEST_QUERY}");
        answer(manager, id, SMOKE_TEST_QUERY, stream).await?;
    }

    if let Some(query) = cli.query.as_deref() {
        answer(manager, id, query, stream).await?;
        return Ok(());
    }
    if cli.smoke_test {
        return Ok(());
    }

    repl(manager, id, stream).await
}

/// Read questions from stdin until `exit`, end of input, or Ctrl-C.
async fn repl(manager: &SessionManager, id: ConversationId, stream: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nEnter your question (or 'exit' to quit): ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else { break };
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        match answer(manager, id, question, stream).await {
            Ok(Outcome::Answered) => {}
            Ok(Outcome::Cancelled) => eprintln!("[answer cancelled]"),
            Err(e) => {
                eprintln!("Error: {e}");
                if e.is_fatal() {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Answer one question, printing it to stdout. Ctrl-C cancels the answer.
async fn answer(
    manager: &SessionManager,
    id: ConversationId,
    question: &str,
    stream: bool,
) -> Result<Outcome, SessionError> {
    if !stream {
        return tokio::select! {
            result = manager.ask(id, question) => {
                println!("\nResponse: {}", result?);
                Ok(Outcome::Answered)
            }
            _ = tokio::signal::ctrl_c() => Ok(Outcome::Cancelled),
        };
    }

    let mut answer = tokio::select! {
        result = manager.ask_stream(id, question) => result?,
        _ = tokio::signal::ctrl_c() => return Ok(Outcome::Cancelled),
    };

    print!("\nResponse: ");
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            chunk = answer.next() => match chunk {
                Some(Ok(text)) => {
                    print!("{text}");
                    let _ = stdout.flush();
                }
                Some(Err(e)) => {
                    println!();
                    return Err(e);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                answer.cancel();
                println!();
                return Ok(Outcome::Cancelled);
            }
        }
    }
    println!();
    Ok(Outcome::Answered)
}
