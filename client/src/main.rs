use clap::Parser;
use client::bot;
use client::connection::Connection;
use log::{error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Environment variable that selects the server port, shared with the
/// server process.
const PORT_ENV: &str = "CYCLES_PORT";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Display name announced to the server
    name: String,
    /// Server host to connect to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let port = match std::env::var(PORT_ENV) {
        Ok(port) => port,
        Err(_) => {
            error!("please set the {} environment variable", PORT_ENV);
            std::process::exit(1);
        }
    };
    let addr = format!("{}:{}", args.host, port);

    let mut rng = StdRng::from_entropy();
    let inertia = rng.gen_range(0..=50);

    let (mut connection, color) = Connection::connect(&addr, &args.name).await?;
    info!(
        "{}: assigned color r={} g={} b={}",
        args.name, color.r, color.g, color.b
    );

    let mut previous = None;
    loop {
        let state = match connection.receive_state().await {
            Ok(state) => state,
            Err(e) => {
                info!("{}: session ended: {}", args.name, e);
                break;
            }
        };
        let Some(me) = state.find_player(&args.name).cloned() else {
            info!("{}: eliminated", args.name);
            break;
        };

        let direction = bot::decide_move(&state, &me, previous, inertia, &mut rng)?;
        previous = Some(direction);
        connection.send_move(direction).await?;
    }

    Ok(())
}
