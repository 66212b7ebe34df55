use std::{env, str::FromStr, time::Duration};

use mooring_core::BackendKind;

use crate::MooringError;

/// Settings read from the environment at startup
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: mooring_core::Config,
    pub club: mooring_club::Config,
}

/// Whether debug logs of the local crates should be shown.
pub fn verbose() -> bool {
    var("MOORING_VERBOSE").is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: FromStr>(name: &'static str) -> Result<Option<T>, MooringError> {
    match var(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| MooringError::InvalidVariable { name, value }),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, MooringError> {
        let mut backend = mooring_core::Config::default();

        if let Some(value) = var("MOORING_BACKEND") {
            backend.kind = BackendKind::parse(&value).ok_or(MooringError::InvalidVariable {
                name: "MOORING_BACKEND",
                value,
            })?;
        }

        backend.project_id = var("MOORING_PROJECT_ID").unwrap_or_default();
        backend.api_key = var("MOORING_API_KEY");
        backend.id_token = var("MOORING_ID_TOKEN");

        if let Some(millis) = parse::<u64>("MOORING_POLL_INTERVAL_MS")? {
            backend.poll_interval = Duration::from_millis(millis.max(100));
        }

        if backend.kind == BackendKind::Firestore && backend.project_id.is_empty() {
            return Err(MooringError::MissingVariable("MOORING_PROJECT_ID"));
        }

        let club = match parse::<i32>("MOORING_UTC_OFFSET_MINUTES")? {
            Some(minutes) => mooring_club::Config::with_offset_minutes(minutes),
            None => mooring_club::Config::default(),
        };

        Ok(Self { backend, club })
    }
}
