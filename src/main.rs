use storystream::ai::OllamaClient;
use storystream::config::Config;
use storystream::db::Repository;
use storystream::engine::Engine;
use storystream::error::Result;
use storystream::feed::FeedFetcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let config = Config::load()?;
    let repo = Repository::new(&config.db_path).await?;

    // Subcommand-style flags; anything unrecognized prints usage.
    match args.get(1).map(String::as_str) {
        Some("--add") => {
            let Some(url) = args.get(2) else {
                eprintln!("usage: storystream --add <url> [title]");
                std::process::exit(2);
            };
            let title = args.get(3).map(String::as_str).unwrap_or("");
            let id = repo.add_feed(url, title).await?;
            println!("Subscribed feed {} ({})", id, url);
            return Ok(());
        }
        Some("--remove") => {
            let Some(id) = args.get(2).and_then(|s| s.parse::<i64>().ok()) else {
                eprintln!("usage: storystream --remove <feed-id>");
                std::process::exit(2);
            };
            repo.remove_feed(id).await?;
            println!("Removed feed {}", id);
            return Ok(());
        }
        Some("--list") => {
            for feed in repo.get_feeds().await? {
                println!("{}\t{}\t{}", feed.id, feed.title, feed.url);
            }
            return Ok(());
        }
        Some("--once") | None => {}
        Some(other) => {
            eprintln!("unknown flag: {}", other);
            eprintln!("usage: storystream [--add <url> [title] | --remove <feed-id> | --list | --once]");
            std::process::exit(2);
        }
    }

    let ai = OllamaClient::new(
        config.ollama_url.clone(),
        config.embed_model.clone(),
        config.generate_model.clone(),
    );
    let engine = Engine::new(repo, FeedFetcher::new(), ai, &config);

    // --once: a single full pipeline pass, then exit.
    if args.get(1).map(String::as_str) == Some("--once") {
        engine.run_cycle().await?;
        engine.run_embeddings().await?;
        let clusters = engine.run_clustering().await?;
        let scores = engine.run_newsworthiness_scoring().await?;
        println!(
            "Cycle complete: {} new item(s), {} clustered, {} scored",
            engine.apply_pending(),
            clusters.clustered,
            scores.scored
        );
        return Ok(());
    }

    // Default: run the background loop until interrupted.
    engine.start();
    tokio::signal::ctrl_c().await?;
    engine.stop();
    Ok(())
}
