use std::borrow::Cow;

use chrono::{DateTime, Utc};
use mooring_core::{
    decode_all, observer, BackendError, Document, DocumentObserver, QueryObserver, Record,
    SharedObserver,
};
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

mod data;
pub use data::*;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The input was rejected before anything was written
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationErrors),
    /// A record that should exist doesn't
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    /// Something went wrong with the backend
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ServiceError {
    /// The identity token expired and the user has to sign in again.
    pub fn is_stale_session(&self) -> bool {
        matches!(self, Self::Backend(BackendError::Unauthenticated))
    }
}

/// Helper trait to reduce boilerplate
pub(crate) trait RequireRecord<T> {
    /// Turns a missing record into a not found error
    fn or_not_found(self, resource: &'static str, identifier: &str) -> Result<T>;
}

impl<T> RequireRecord<T> for Option<T> {
    fn or_not_found(self, resource: &'static str, identifier: &str) -> Result<T> {
        self.ok_or_else(|| ServiceError::NotFound {
            resource,
            identifier: identifier.to_string(),
        })
    }
}

fn validation_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

/// Wraps a record-list observer so it can watch a raw query. Malformed documents are
/// skipped and the rest are ordered by `sort`.
pub(crate) fn records_observer<R, F>(target: SharedObserver<Vec<R>>, sort: F) -> QueryObserver
where
    R: Record + Send + Sync + 'static,
    F: Fn(&mut [R]) + Send + Sync + 'static,
{
    let errors = target.clone();

    observer(
        move |documents: &Vec<Document>| {
            let mut records = decode_all::<R>(documents);
            sort(records.as_mut_slice());
            target.on_next(&records)
        },
        move |e: &BackendError| errors.on_error(e),
    )
}

/// Wraps a single-record observer so it can watch a raw document. A document that
/// doesn't decode is reported as an error.
pub(crate) fn record_observer<R>(target: SharedObserver<Option<R>>) -> DocumentObserver
where
    R: Record + Send + Sync + 'static,
{
    let errors = target.clone();

    observer(
        move |document: &Option<Document>| match document.as_ref().map(R::decode).transpose() {
            Ok(record) => target.on_next(&record),
            Err(e) => target.on_error(&BackendError::Decode(e)),
        },
        move |e: &BackendError| errors.on_error(e),
    )
}

#[derive(Debug, Clone, Validate)]
#[validate(schema(function = "validate_booking_slot"))]
pub struct NewBooking {
    #[validate(length(min = 1, message = "A booking needs a member"))]
    pub user_id: String,
    pub user_name: String,
    #[validate(length(min = 1, message = "Select at least one yacht"))]
    pub yacht_ids: Vec<String>,
    pub yacht_names: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn validate_booking_slot(booking: &NewBooking) -> std::result::Result<(), ValidationError> {
    if booking.end <= booking.start {
        return Err(validation_error(
            "end_before_start",
            "The end time must be after the start time",
        ));
    }

    if booking.yacht_ids.len() != booking.yacht_names.len() {
        return Err(validation_error(
            "yacht_names_mismatch",
            "Every yacht needs a name",
        ));
    }

    Ok(())
}

/// Profile details collected when a user finishes signing up
#[derive(Debug, Clone, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, message = "A phone number is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "A name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "A surname is required"))]
    pub surname: String,
    pub pseudonym: Option<String>,
    pub description: Option<String>,
}

/// A profile edit. Only fields that are `Some` are written.
#[derive(Debug, Clone, Default)]
pub struct UpdatedUser {
    pub id: String,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub pseudonym: Option<String>,
    pub description: Option<String>,
    pub preferences: Option<Preferences>,
}

#[derive(Debug, Clone, Validate)]
pub struct NewYacht {
    #[validate(length(min = 1, message = "A yacht needs a name"))]
    pub name: String,
    pub kind: String,
    #[validate(length(min = 1, max = 4, message = "The shortcut should be 1-4 characters"))]
    pub shortcut: String,
    pub description: String,
    pub status: YachtStatus,
}

#[derive(Debug, Clone, Default)]
pub struct UpdatedYacht {
    pub id: String,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub shortcut: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Validate)]
pub struct NewNews {
    #[validate(length(min = 1, message = "News needs a title"))]
    pub title: String,
    pub description: String,
    pub category: String,
    pub deactivation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdatedNews {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    /// `Some(None)` clears the deactivation date
    pub deactivation_date: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Validate)]
pub struct NewNote {
    #[validate(length(min = 1))]
    pub booking_id: String,
    #[validate(length(min = 1, message = "A note can't be empty"))]
    pub content: String,
    pub creator_id: String,
    pub is_admin: bool,
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn booking(start_hour: u32, end_hour: u32) -> NewBooking {
        NewBooking {
            user_id: "u1".to_string(),
            user_name: "Ada".to_string(),
            yacht_ids: vec!["y1".to_string()],
            yacht_names: vec!["Orion".to_string()],
            start: Utc.with_ymd_and_hms(2024, 6, 1, start_hour, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 1, end_hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn booking_slots_are_validated() {
        assert!(booking(10, 11).validate().is_ok());
        assert!(booking(11, 11).validate().is_err(), "empty slot is invalid");
        assert!(booking(12, 11).validate().is_err(), "reversed slot is invalid");

        let mut no_yacht = booking(10, 11);
        no_yacht.yacht_ids.clear();
        no_yacht.yacht_names.clear();
        assert!(no_yacht.validate().is_err());

        let mut unnamed = booking(10, 11);
        unnamed.yacht_names.clear();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn stale_sessions_are_recognized() {
        assert!(ServiceError::Backend(BackendError::Unauthenticated).is_stale_session());
        assert!(!ServiceError::Backend(BackendError::Network("down".to_string())).is_stale_session());
    }
}
