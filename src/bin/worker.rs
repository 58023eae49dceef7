#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = evalq::run_worker().await {
        eprintln!("evalq-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
