use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

use review_crawler::{run_scrape, PgReviewStore, ReviewStore, RunRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let query = match args.next() {
        Some(q) => q,
        None => {
            eprintln!("Usage: review-crawler <query> [count]");
            std::process::exit(2);
        }
    };
    let requested_count: usize = args
        .next()
        .map(|n| n.parse())
        .transpose()?
        .unwrap_or(100);

    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    let registry = RunRegistry::new();

    println!("🔎 Scraping up to {} reviews for '{}'...", requested_count, query);
    let result = run_scrape(pool.clone(), &query, requested_count).await?;
    let run_id = registry.record(result.clone());

    println!(
        "✅ Run {} complete: {:.2}% positive (table {})",
        run_id, result.positive_percentage, result.review_table_id
    );

    let store = PgReviewStore::new(pool);
    let records = store.fetch_run(&result.review_table_id).await?;
    println!("💾 {} reviews persisted.", records.len());

    Ok(())
}
