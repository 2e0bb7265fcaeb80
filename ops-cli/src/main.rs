use clap::Parser;
use ops_cli::{run, Cli};
use telemetry::{init_tracing, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs { LogFormat::Json } else { LogFormat::Human };
    init_tracing(format, &cli.log_filter)?;

    let output = run(&cli).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
