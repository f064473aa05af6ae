#[tokio::main]
async fn main() -> anyhow::Result<()> {
    toolhub::run_cli().await
}
