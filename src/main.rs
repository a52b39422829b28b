use anyhow::Result;
use barectl::agent::AgentBuilder;
use barectl::config::{Cli, Config};
use clap::Parser;
use std::fs::File;
use tokio::select;
use tracing::{info, level_filters::LevelFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli
        .conf
        .map(|conf| Config::load(&conf).expect("Failed to load config"))
        .unwrap_or_default();

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    // the appender guard must outlive the agent or buffered log lines are
    // dropped on exit
    let _guard = if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file).expect("Failed to create log file");
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        log_fmt.with_writer(non_blocking).try_init().ok();
        Some(guard)
    } else {
        log_fmt.try_init().ok();
        None
    };

    let mut agent = AgentBuilder::new().with_config(config).build()?;
    let handle = agent.handle();

    info!("starting barectl {}", env!("CARGO_PKG_VERSION"));
    let mut server = tokio::spawn(async move { agent.serve().await });
    select! {
        result = &mut server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            handle.shutdown();
            server.await??;
        }
    }
    Ok(())
}
