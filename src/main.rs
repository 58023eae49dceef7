#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = evalq::run().await {
        eprintln!("evalq fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
