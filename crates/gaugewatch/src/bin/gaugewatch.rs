#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gaugewatch::runner::run(argh::from_env()).await
}
