use futures_util::future::try_join_all;
use log::debug;
use mooring_core::{
    fields, Backend, DocumentPath, FilterOp, Query, Record, SharedObserver, Subscription,
};
use validator::Validate;

use super::ClubContext;
use crate::{created_now, sort_notes, NewNote, NoteData, Result};

/// The internal message thread attached to each booking.
pub struct NoteService<B: ?Sized> {
    context: ClubContext<B>,
}

impl<B: Backend + ?Sized> NoteService<B> {
    pub fn new(context: &ClubContext<B>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    pub async fn add(&self, new_note: NewNote) -> Result<String> {
        new_note.validate()?;

        let mut fields = fields! {
            "bookingId" => new_note.booking_id.as_str(),
            "content" => new_note.content,
            "creatorId" => new_note.creator_id,
            "isAdmin" => new_note.is_admin,
            "read" => false,
        };
        fields.extend(created_now());

        let id = self.context.backend.add(NoteData::COLLECTION, fields).await?;

        debug!("Note {} added to booking {}", id, new_note.booking_id);
        Ok(id)
    }

    /// Watches the thread of a booking, oldest first.
    pub fn subscribe_notes(
        &self,
        booking_id: &str,
        observer: SharedObserver<Vec<NoteData>>,
    ) -> Subscription {
        self.context
            .watch_records(thread_query(booking_id), observer, sort_notes)
    }

    pub async fn mark_read(&self, note_id: &str) -> Result<()> {
        self.context
            .backend
            .update(
                &DocumentPath::new(NoteData::COLLECTION, note_id),
                fields! { "read" => true },
            )
            .await?;

        Ok(())
    }

    /// Marks what the other side wrote as read. Returns how many notes changed.
    pub async fn mark_thread_read(&self, booking_id: &str, reader_is_admin: bool) -> Result<usize> {
        let unread = self.unread(booking_id, reader_is_admin).await?;

        let paths: Vec<_> = unread
            .iter()
            .map(|n| DocumentPath::new(NoteData::COLLECTION, &n.id))
            .collect();
        let updates = paths
            .iter()
            .map(|path| self.context.backend.update(path, fields! { "read" => true }));

        try_join_all(updates).await?;
        Ok(unread.len())
    }

    /// How many notes from the other side the reader hasn't seen.
    pub async fn unread_count(&self, booking_id: &str, reader_is_admin: bool) -> Result<usize> {
        Ok(self.unread(booking_id, reader_is_admin).await?.len())
    }

    async fn unread(&self, booking_id: &str, reader_is_admin: bool) -> Result<Vec<NoteData>> {
        let query = thread_query(booking_id)
            .filter("isAdmin", FilterOp::Equal, !reader_is_admin)
            .filter("read", FilterOp::Equal, false);

        self.context.list(&query).await
    }
}

fn thread_query(booking_id: &str) -> Query {
    Query::collection(NoteData::COLLECTION).filter("bookingId", FilterOp::Equal, booking_id)
}
