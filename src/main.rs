use anyhow::Result;
use clap::Parser;

use seo_pipeline::utils::logging;
use seo_pipeline::{App, Cli, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config = Config::load(&cli)?;

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    let app = App::initialize(config).await?;
    let output = app.run().await;

    println!("{}", serde_json::to_string_pretty(&app.render(&output))?);

    Ok(())
}
