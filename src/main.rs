use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use roomlock::api::{ApiError, BookingService};
use roomlock::compactor::maybe_compact;
use roomlock::config::Config;
use roomlock::engine::{Engine, EngineError, Store};

/// Room booking store with per-room conflict-free reservations.
#[derive(Parser)]
#[command(name = "roomlock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory holding the WAL (overrides ROOMLOCK_DATA_DIR)
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a hotel
    AddHotel { name: String },

    /// Create a room in a hotel
    AddRoom { hotel_id: String, name: String },

    /// Delete a hotel with its rooms and bookings
    RemoveHotel { hotel_id: String },

    /// Delete a room with its bookings
    RemoveRoom { room_id: String },

    /// List hotels
    Hotels,

    /// List rooms of a hotel
    Rooms { hotel_id: String },

    /// List bookings of a room
    Bookings { room_id: String },

    /// Check whether a room is free for [start, end) (advisory)
    Check {
        room_id: String,
        start: String,
        end: String,
    },

    /// Book a room for [start, end)
    Book {
        room_id: String,
        start: String,
        end: String,
    },

    /// Cancel a booking
    Cancel { booking_id: String },

    /// Rewrite the WAL down to live state
    Compact,
}

impl Commands {
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Commands::Hotels
                | Commands::Rooms { .. }
                | Commands::Bookings { .. }
                | Commands::Check { .. }
                | Commands::Compact
        )
    }
}

fn render(value: &impl Serialize) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value).map_err(|e| ApiError {
        code: "serialization",
        message: e.to_string(),
        retryable: false,
    })
}

async fn dispatch(service: &BookingService, command: Commands) -> Result<String, ApiError> {
    match command {
        Commands::AddHotel { name } => render(&service.add_hotel(&name).await?),
        Commands::AddRoom { hotel_id, name } => render(&service.add_room(&hotel_id, &name).await?),
        Commands::RemoveHotel { hotel_id } => {
            render(&json!({ "removed": service.remove_hotel(&hotel_id).await? }))
        }
        Commands::RemoveRoom { room_id } => {
            render(&json!({ "removed": service.remove_room(&room_id).await? }))
        }
        Commands::Hotels => render(&service.hotels()),
        Commands::Rooms { hotel_id } => render(&service.rooms_by_hotel(&hotel_id)),
        Commands::Bookings { room_id } => render(&service.bookings_by_room(&room_id).await?),
        Commands::Check {
            room_id,
            start,
            end,
        } => {
            let available = service.check_availability(&room_id, &start, &end).await?;
            render(&json!({ "available": available }))
        }
        Commands::Book {
            room_id,
            start,
            end,
        } => render(&service.create_booking(&room_id, &start, &end).await?),
        Commands::Cancel { booking_id } => {
            render(&json!({ "cancelled": service.cancel_booking(&booking_id).await? }))
        }
        Commands::Compact => {
            service.compact().await?;
            render(&json!({ "compacted": true }))
        }
    }
}

fn fail(err: &ApiError) -> ExitCode {
    match serde_json::to_string(err) {
        Ok(body) => eprintln!("{body}"),
        Err(_) => eprintln!("{err}"),
    }
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        return fail(&EngineError::StorageUnavailable(e.to_string()).into());
    }
    let store = match Store::open(&config.wal_path(), config.store_options()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            return fail(&EngineError::StorageUnavailable(e.to_string()).into());
        }
    };
    info!("data_dir: {}", config.data_dir.display());

    let service = BookingService::new(Engine::new(store.clone()), config.retry_policy());
    let mutates = cli.command.mutates();

    match dispatch(&service, cli.command).await {
        Ok(out) => {
            println!("{out}");
            if mutates && let Err(e) = maybe_compact(&store, config.compact_threshold).await {
                warn!("WAL compaction skipped: {e}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
