use arcade_client::game::ClientWorld;
use arcade_client::interpolation::{InterpolationConfig, InterpolationMode};
use arcade_client::network::{grazer_steering, Client, ClientExit};
use arcade_client::prediction::Predictor;
use arcade_shared::{Credentials, JoinRequest, PlayerIdentity};
use clap::Parser;
use log::info;
use std::f32::consts::TAU;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Game to join
    #[arg(short = 'g', long, default_value = "grazer")]
    game: String,

    /// Name shown to other players
    #[arg(short = 'n', long, default_value = "Player")]
    name: String,

    /// Session-scoped numeric player id
    #[arg(long, default_value = "1")]
    player_id: u32,

    /// Stable profile id on the host platform
    #[arg(long, default_value = "local-profile")]
    profile: String,

    /// World the player arrives from
    #[arg(long, default_value = "local-world")]
    world: String,

    /// Scene / session the player arrives from
    #[arg(long, default_value = "lobby")]
    session: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Interpolation buffer in milliseconds
    #[arg(long, default_value = "100")]
    buffer: u64,

    /// Use Catmull-Rom instead of linear interpolation
    #[arg(long)]
    hermite: bool,

    /// Frames over which a misprediction is blended out
    #[arg(long, default_value = "6")]
    smoothing: u32,

    /// Leave after this many seconds
    #[arg(short = 'd', long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let request = JoinRequest {
        identity: PlayerIdentity {
            display_name: args.name.clone(),
            username: args.name.to_lowercase(),
            profile_id: args.profile.clone(),
            numeric_id: args.player_id,
            asset_id: "arcade-client".to_string(),
            world_slug: args.world.clone(),
            session_id: args.session.clone(),
        },
        credentials: Credentials {
            nonce: format!("{:x}", arcade_shared::get_timestamp()),
            key: "local".to_string(),
            identity: args.profile.clone(),
        },
    };

    let mode = if args.hermite {
        InterpolationMode::Hermite
    } else {
        InterpolationMode::Linear
    };
    let interpolation = InterpolationConfig::default()
        .with_buffer(args.buffer)
        .with_mode(mode)
        .angular("heading", TAU);
    let world = ClientWorld::new(Predictor::new(grazer_steering, args.smoothing), interpolation);

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let mut client = Client::new(&args.server, &args.game, request, world, args.fake_ping).await?;

    let duration = args.duration.map(Duration::from_secs);
    let exit = tokio::select! {
        exit = client.run(duration) => exit?,
        _ = tokio::signal::ctrl_c() => ClientExit::Finished,
    };

    info!("Client stopped: {:?}", exit);
    Ok(())
}
