use clap::Parser;
use log::{error, info};
use std::path::Path;

use aircheck::configuration::config::Config;
use aircheck::controller::controller_handler::Controller;

#[derive(Parser)]
#[command(name = "aircheck")]
#[command(version = "0.1.0")]
#[command(about = "Continuous audio stream capture engine")]
struct Args {
    config_file: String,
}

#[tokio::main]
async fn main() {
    // Example how to log
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    println!(
        "
 █████╗ ██╗██████╗  ██████╗██╗  ██╗███████╗ ██████╗██╗  ██╗
██╔══██╗██║██╔══██╗██╔════╝██║  ██║██╔════╝██╔════╝██║ ██╔╝
███████║██║██████╔╝██║     ███████║█████╗  ██║     █████╔╝
██╔══██║██║██╔══██╗██║     ██╔══██║██╔══╝  ██║     ██╔═██╗
██║  ██║██║██║  ██║╚██████╗██║  ██║███████╗╚██████╗██║  ██╗
╚═╝  ╚═╝╚═╝╚═╝  ╚═╝ ╚═════╝╚═╝  ╚═╝╚══════╝ ╚═════╝╚═╝  ╚═╝
===========================================================
        Continuous audio stream capture engine v0.1.0
===========================================================
"
    );

    info!("Importing configuration");

    let args = Args::parse();

    let config = match Config::from_file(Path::new(args.config_file.as_str())) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {:?}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration imported successfully");

    let controller = match Controller::new(config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!(
                "Unable to create a controller instance: {:?}, exiting...",
                e
            );
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!(
            "Error occured in the controller process: {:?}, exiting...",
            e
        );
        std::process::exit(1);
    }
}
