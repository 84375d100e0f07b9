use clap::Parser;
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use server::config::Config;
use server::game::Game;
use server::network::{GameServer, Timing};
use std::time::Duration;

/// Environment variable that selects the listening port. Required; there
/// is no default port.
const PORT_ENV: &str = "CYCLES_PORT";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the configuration file
    #[clap(default_value = "config.toml")]
    config: String,
    /// Tick rate (simulation steps per second)
    #[clap(short, long, default_value = "10")]
    tick_rate: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let port: u16 = match std::env::var(PORT_ENV) {
        Ok(value) => match value.parse() {
            Ok(port) => port,
            Err(_) => {
                error!("{} is not a valid port number: {}", PORT_ENV, value);
                std::process::exit(1);
            }
        },
        Err(_) => {
            error!("please set the {} environment variable", PORT_ENV);
            std::process::exit(1);
        }
    };

    if args.tick_rate == 0 {
        error!("tick rate must be at least 1");
        std::process::exit(1);
    }

    let conf = Config::load(&args.config)?;
    info!(
        "grid {}x{}, up to {} clients",
        conf.grid_width, conf.grid_height, conf.max_clients
    );

    let game = Game::new(conf.clone(), StdRng::from_entropy());
    let timing = Timing {
        tick_period: Duration::from_secs_f64(1.0 / args.tick_rate as f64),
        ..Timing::default()
    };

    let addr = format!("0.0.0.0:{}", port);
    let server = match GameServer::new(&addr, &conf, game, timing).await {
        Ok(server) => server,
        Err(e) => {
            error!("failed to bind to port {}: {}", port, e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = server.run() => {
            info!("session finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
