use std::sync::Arc;

use colored::Colorize;
use config::Settings;
use log::{error, info, warn};
use mooring_club::Club;
use mooring_core::{Backend, BackendError, BackendKind, Clock, MemoryStorage, SystemClock};
use monitor::AdminMonitor;
use thiserror::Error;
use tokio::runtime::{self, Runtime};

mod config;
mod logging;
mod monitor;

pub struct Mooring {
    club: Club<dyn Backend>,
    runtime: Runtime,
}

#[derive(Debug, Error)]
pub enum MooringError {
    #[error("{0} is not set")]
    MissingVariable(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    InvalidVariable { name: &'static str, value: String },

    #[error("The booking feed failed: {0}")]
    Feed(#[from] BackendError),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Mooring {
    fn new(settings: Settings) -> Result<Self, MooringError> {
        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("mooring-async")
            .build()
            .map_err(|e| MooringError::Fatal(e.to_string()))?;

        match settings.backend.kind {
            BackendKind::Memory => warn!("Using the in-memory backend, nothing will be saved"),
            BackendKind::Firestore => info!(
                "Connecting to project {}...",
                settings.backend.project_id
            ),
        }

        let backend = mooring_core::connect(&settings.backend, runtime.handle().clone());
        let club = Club::new(
            backend,
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock),
            settings.club,
        );

        Ok(Self { club, runtime })
    }

    fn run(&self) -> Result<(), MooringError> {
        self.runtime.block_on(async {
            let now = self.club.context.clock.now();
            if let Err(e) = self.club.news.archive_expired(now).await {
                warn!("Could not archive expired news: {}", e);
            }

            let monitor = AdminMonitor::start(&self.club);

            tokio::select! {
                error = monitor.run() => Err(MooringError::Feed(error)),
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down...");
                    Ok(())
                }
            }
        })
    }
}

impl MooringError {
    fn hint(&self) -> String {
        match self {
            MooringError::MissingVariable(_) => "Set the variable, or use MOORING_BACKEND=memory to run without a project.".to_string(),
            MooringError::InvalidVariable { .. } => "Fix the variable and try again. Durations are in milliseconds and offsets in minutes east of UTC.".to_string(),
            MooringError::Feed(BackendError::Unauthenticated) => "The identity token has expired. Sign in again and update MOORING_ID_TOKEN.".to_string(),
            MooringError::Feed(BackendError::PermissionDenied(_)) => "The identity is not allowed to read bookings. Make sure it belongs to an admin.".to_string(),
            MooringError::Feed(_) => "Make sure the project exists and is reachable, then try again.".to_string(),
            MooringError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn report(error: MooringError) {
    error!(
        "{} Read the error below to troubleshoot the issue.",
        "Mooring stopped!".bold().red()
    );
    error!("{}", error);
    error!(
        "{}",
        format!("Hint: {}", error.hint()).dimmed().italic()
    );
}

fn main() {
    if let Err(e) = logging::init_logger(config::verbose()) {
        eprintln!("Could not initialize logging: {}", e);
    }

    let result = Settings::from_env()
        .and_then(Mooring::new)
        .and_then(|mooring| {
            info!("Initialized successfully.");
            mooring.run()
        });

    if let Err(error) = result {
        report(error);
    }
}
