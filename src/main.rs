use clap::Parser;
use log::error;

use ssh_zone_ca::{CliArgs, run};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
