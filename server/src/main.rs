use arcade_server::games::grazer::{self, GrazerSettings};
use arcade_server::network::Server;
use arcade_server::platform::{LoggingPlatform, PlatformCredentials};
use arcade_server::rooms::RoomDirectory;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Grazer tick rate (updates per second)
    #[clap(short, long, default_value = "20")]
    tick_rate: f32,
    /// Food pellets per arena
    #[clap(long, default_value = "12")]
    food: usize,
    /// Players per session the server tops up with bots
    #[clap(long, default_value = "4")]
    bots: usize,
    /// Score that ends a round
    #[clap(long)]
    score_limit: Option<i64>,
    /// Seed for bot behavior and food placement
    #[clap(long)]
    seed: Option<u64>,
    /// Log grazer debug output
    #[clap(short, long)]
    debug: bool,
    /// Seconds of silence before a client is dropped
    #[clap(long, default_value = "5")]
    client_timeout: u64,
}

/// Main-method of the application.
/// Parses command-line arguments, registers the bundled games and runs the server until ctrl-c.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let args = Args::parse();

    let credentials = match PlatformCredentials::from_env() {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            warn!("{}; platform calls will only be logged", e);
            None
        }
    };
    let platform = Arc::new(LoggingPlatform::new(credentials));

    let settings = GrazerSettings {
        tick_rate: args.tick_rate,
        food_count: args.food,
        fill_target: args.bots,
        score_limit: args.score_limit,
        seed: args.seed,
        debug: args.debug,
        ..GrazerSettings::default()
    };

    let (mut directory, events) = RoomDirectory::new();
    directory.register_game(grazer::definition(settings)?, platform);

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(
        &address,
        directory,
        events,
        Duration::from_secs(args.client_timeout),
    )
    .await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    Ok(())
}
