use log::info;
use mooring_core::{
    fields, Backend, Direction, DocumentPath, FieldEnum, FilterOp, Query, Record, SharedObserver,
    Subscription,
};
use validator::Validate;

use super::ClubContext;
use crate::{
    created_now, sort_bookings, BookingData, BookingStatus, NewBooking, RequireRecord, Result,
};

/// Creates bookings and moves them through their approval lifecycle.
pub struct BookingService<B: ?Sized> {
    context: ClubContext<B>,
}

impl<B: Backend + ?Sized> BookingService<B> {
    pub fn new(context: &ClubContext<B>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Requests a booking. New bookings always start out pending.
    pub async fn create(&self, new_booking: NewBooking) -> Result<String> {
        new_booking.validate()?;

        let mut fields = fields! {
            "userId" => new_booking.user_id.as_str(),
            "userName" => new_booking.user_name,
            "yachtIds" => new_booking.yacht_ids,
            "yachtNames" => new_booking.yacht_names,
            "startTime" => new_booking.start,
            "endTime" => new_booking.end,
            "status" => BookingStatus::Pending.as_str(),
        };
        fields.extend(created_now());

        let id = self
            .context
            .backend
            .add(BookingData::COLLECTION, fields)
            .await?;

        info!("Booking {} requested by {}", id, new_booking.user_id);
        Ok(id)
    }

    pub async fn booking(&self, id: &str) -> Result<BookingData> {
        self.context
            .find(id)
            .await?
            .or_not_found(BookingData::COLLECTION, id)
    }

    /// Watches a single booking. The observer gets `None` if it doesn't exist.
    pub fn subscribe_booking(
        &self,
        id: &str,
        observer: SharedObserver<Option<BookingData>>,
    ) -> Subscription {
        self.context.watch_record(id, observer)
    }

    /// Overwrites the status of a booking.
    pub async fn set_status(&self, id: &str, status: BookingStatus) -> Result<()> {
        let path = DocumentPath::new(BookingData::COLLECTION, id);

        self.context
            .backend
            .update(&path, fields! { "status" => status.as_str() })
            .await?;

        info!("Booking {} is now {}", id, status);
        Ok(())
    }

    pub async fn approve(&self, id: &str) -> Result<()> {
        self.set_status(id, BookingStatus::Approved).await
    }

    pub async fn reject(&self, id: &str) -> Result<()> {
        self.set_status(id, BookingStatus::Rejected).await
    }

    pub async fn cancel(&self, id: &str) -> Result<()> {
        self.set_status(id, BookingStatus::Cancelled).await
    }

    /// Every booking a member made, in start order.
    pub async fn bookings_for_user(&self, user_id: &str) -> Result<Vec<BookingData>> {
        let mut bookings = self.context.list(&user_query(user_id)).await?;
        sort_bookings(&mut bookings);

        Ok(bookings)
    }

    pub fn subscribe_user_bookings(
        &self,
        user_id: &str,
        observer: SharedObserver<Vec<BookingData>>,
    ) -> Subscription {
        self.context
            .watch_records(user_query(user_id), observer, sort_bookings)
    }

    /// Watches the bookings waiting for an admin decision.
    pub fn subscribe_pending(&self, observer: SharedObserver<Vec<BookingData>>) -> Subscription {
        let query = Query::collection(BookingData::COLLECTION)
            .filter("status", FilterOp::Equal, BookingStatus::Pending.as_str())
            .order_by("startTime", Direction::Ascending);

        self.context.watch_records(query, observer, sort_bookings)
    }
}

fn user_query(user_id: &str) -> Query {
    Query::collection(BookingData::COLLECTION)
        .filter("userId", FilterOp::Equal, user_id)
        .order_by("startTime", Direction::Ascending)
}
