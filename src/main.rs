#[tokio::main]
async fn main() -> anyhow::Result<()> {
    visitor_analytics::server::run().await
}
