use std::path::PathBuf;

use clap::Parser;
use gatemq::{GatewayConfig, GatewayNode, GatewayResult, GLOBAL_CONFIG};
use tokio::runtime;
use tracing::error;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn main() {
    if let Err(e) = run() {
        error!("gatemq started failed: {}", e);
        eprintln!("gatemq started failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> GatewayResult<()> {
    let commandline: CommandLine = CommandLine::parse();

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let _log_guard = gatemq::setup_tracing();

    // setup config
    let gateway_config = match commandline.conf.as_ref() {
        Some(path) => GatewayConfig::load(PathBuf::from(path))?,
        None => {
            let default_path = PathBuf::from("conf.toml");
            if default_path.exists() {
                GatewayConfig::load(default_path)?
            } else {
                GatewayConfig::default()
            }
        }
    };
    GLOBAL_CONFIG
        .set(gateway_config)
        .expect("set gateway config failed");

    GatewayNode::start(&rt)?;

    Ok(())
}
