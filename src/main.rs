use std::{
    io::{BufRead, Write},
    time::Duration,
};

use clap::Parser;
use ragchat::{
    ChatCompletionsClient,
    ColbertEmbedder,
    DataDir,
    ModelManager,
    RagPipeline,
    Result,
    Settings,
    cli::{AskArgs, Cli, Command, RetrieveArgs},
    completion::{CompletionModel, Unconfigured},
    model_manager::download_with_retries,
    server,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("RAGCHAT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let settings = cli.pipeline.settings(&data_dir);

    match cli.command {
        Command::Serve(args) => {
            let pipeline = open_pipeline(settings, true)?;
            server::serve(pipeline, &args.bind)?;
        }
        Command::Sync => {
            let mut pipeline = open_pipeline(settings, false)?;
            let result = pipeline.sync_folder()?;
            println!(
                "Indexed {} chunks from {} file(s) ({} skipped)",
                result.chunk_count,
                result.files_found - result.files_skipped,
                result.files_skipped
            );
            if pipeline.settings().index_dir.is_none() {
                println!(
                    "Index is in memory only; use --persist or --index-dir \
                     to keep it."
                );
            }
        }
        Command::Ask(args) => {
            let pipeline = open_pipeline(settings, true)?;
            cmd_ask(pipeline, &args)?;
        }
        Command::Retrieve(args) => {
            let pipeline = open_pipeline(settings, false)?;
            cmd_retrieve(pipeline, &args)?;
        }
        Command::Status(args) => {
            let pipeline = open_pipeline(settings, false)?;
            cmd_status(&pipeline, &data_dir, args.json);
        }
        Command::DownloadModel(args) => {
            let dir = download_with_retries(
                &settings.embedding_model,
                args.attempts,
                Duration::from_secs(args.delay),
            )?;
            println!(
                "Model {} ready at {}",
                settings.embedding_model,
                dir.display()
            );
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

/// Build a pipeline; `needs_model` requires a completion API key.
fn open_pipeline(settings: Settings, needs_model: bool) -> Result<RagPipeline> {
    let completion: Box<dyn CompletionModel> = if needs_model {
        Box::new(ChatCompletionsClient::new(
            settings.require_api_key()?,
            &settings.completion_url,
            &settings.completion_model,
            settings.completion_timeout,
        )?)
    } else {
        Box::new(Unconfigured)
    };
    let embedder = ColbertEmbedder::new(ModelManager::with_model_id(
        settings.embedding_model.clone(),
    ));

    RagPipeline::open(settings, Box::new(embedder), completion)
}

fn ensure_synced(pipeline: &mut RagPipeline) -> Result<()> {
    if !pipeline.is_ready() {
        let result = pipeline.sync_folder()?;
        eprintln!("Indexed {} chunks", result.chunk_count);
    }
    Ok(())
}

fn cmd_ask(mut pipeline: RagPipeline, args: &AskArgs) -> Result<()> {
    ensure_synced(&mut pipeline)?;

    if let Some(question) = &args.question {
        return answer(&mut pipeline, question, args.json);
    }

    println!("Ask a question (type 'exit' to quit).");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit" | "q") {
            break;
        }

        // One failed question should not end the session.
        if let Err(e) = answer(&mut pipeline, question, args.json) {
            eprintln!("error: {e}");
        }
    }
    Ok(())
}

/// Snippets shown under an answer.
const SNIPPETS: usize = 3;

/// Characters kept from each snippet.
const SNIPPET_CHARS: usize = 150;

fn answer(
    pipeline: &mut RagPipeline,
    question: &str,
    json: bool,
) -> Result<()> {
    let result = pipeline.chat(question)?;
    let citations = result.citations();

    if json {
        println!(
            "{}",
            json!({
                "answer": result.answer,
                "sources": result.sources(),
                "citations": citations,
            })
        );
        return Ok(());
    }

    println!("\n{}\n", result.answer);
    if citations.is_empty() {
        return Ok(());
    }

    println!("Sources:");
    for citation in &citations {
        println!("  - {citation}");
    }
    for (i, chunk) in result.cited_chunks.iter().take(SNIPPETS).enumerate() {
        let preview: String = chunk.text.chars().take(SNIPPET_CHARS).collect();
        println!(
            "\nSnippet {} from {}: {}...",
            i + 1,
            chunk.file_name(),
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

fn cmd_retrieve(mut pipeline: RagPipeline, args: &RetrieveArgs) -> Result<()> {
    ensure_synced(&mut pipeline)?;
    let retrieval = pipeline.retrieve(&args.question)?;

    if args.json {
        let chunks: Vec<_> = retrieval
            .chunks
            .iter()
            .map(|r| {
                json!({
                    "source": r.chunk.file_name(),
                    "page": r.chunk.page_number,
                    "score": r.score,
                    "similarity": r.similarity,
                    "text": r.chunk.text,
                })
            })
            .collect();
        println!("{}", json!({ "question": args.question, "chunks": chunks }));
        return Ok(());
    }

    if args.context {
        println!("{}", retrieval.context);
        return Ok(());
    }

    if retrieval.chunks.is_empty() {
        println!("No chunks retrieved.");
        return Ok(());
    }
    for r in &retrieval.chunks {
        let page = r
            .chunk
            .page_number
            .map_or_else(|| "?".to_string(), |p| p.to_string());
        let preview: String = r.chunk.text.chars().take(80).collect();
        println!(
            "{:>5} {:.3}  {} p.{page}  {}",
            r.score,
            r.similarity,
            r.chunk.file_name(),
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

fn cmd_status(pipeline: &RagPipeline, data_dir: &DataDir, json: bool) {
    let settings = pipeline.settings();
    let chunks = pipeline.document_count();
    let index = settings
        .index_dir
        .as_ref()
        .map_or_else(|| "in memory".to_string(), |d| d.display().to_string());

    if json {
        println!(
            "{}",
            json!({
                "data_dir": data_dir.root(),
                "documents_dir": settings.documents_dir,
                "index": index,
                "collection": settings.collection,
                "embedding_model": settings.embedding_model,
                "completion_model": settings.completion_model,
                "chunks": chunks,
            })
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Documents: {}", settings.documents_dir.display());
        println!("Index: {index} (collection {})", settings.collection);
        println!("Embedding model: {}", settings.embedding_model);
        println!("Completion model: {}", settings.completion_model);
        println!("Chunks: {chunks}");
    }
}
