use log::{error, info};
use structopt::StructOpt;

use cryptonote_core::CryptonoteCore;

mod config;
use config::Config;

fn main() {
    // Command Line Arguments
    let config = Config::from_args();

    // Logging
    bin_common::logger::init(&config.bin_common_config, "nocturned")
        .expect("Failed to initialise logger");

    // Main
    run(config).unwrap_or_else(|err| error!("Unable to run daemon! {}", err));
    info!("Exiting");
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "{} {} - {}",
        coin_specific::COIN_NAME.0,
        coin_specific::VERSION.0,
        coin_specific::VERSION.1
    );
    info!(
        "Using data directory {}",
        config.bin_common_config.data_dir().display()
    );

    let core = CryptonoteCore::new(&config.cryptonote_core_config)?;

    {
        let chain = core.blockchain();
        let chain = chain.read().expect("chain lock poisoned");
        info!(
            "Chain ready at height {}, tip {}, cumulative difficulty {}",
            chain.current_height(),
            chain.tip_hash(),
            chain.current_cumulative_difficulty()
        );
    }

    // The network and RPC subsystems attach here once they are wired up
    Ok(())
}
