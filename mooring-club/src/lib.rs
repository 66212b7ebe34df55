mod calendar;
mod config;
mod db;
mod services;

use std::sync::Arc;

pub use calendar::*;
pub use config::*;
pub use db::*;
pub use services::*;

use mooring_core::{Backend, FileStorage, SharedClock};

/// The club client, bundling every service over one backend.
pub struct Club<B: Backend + ?Sized> {
    pub context: ClubContext<B>,
    pub config: Config,

    pub bookings: BookingService<B>,
    pub users: UserService<B>,
    pub yachts: YachtService<B>,
    pub news: NewsService<B>,
    pub notes: NoteService<B>,
    /// Shared by every calendar view
    pub calendar: Arc<BookingRangeCache<B>>,
}

impl<B> Club<B>
where
    B: Backend + ?Sized,
{
    pub fn new(
        backend: Arc<B>,
        storage: Arc<dyn FileStorage>,
        clock: SharedClock,
        config: Config,
    ) -> Self {
        let context = ClubContext {
            backend: backend.clone(),
            storage,
            clock: clock.clone(),
        };

        Self {
            bookings: BookingService::new(&context),
            users: UserService::new(&context),
            yachts: YachtService::new(&context),
            news: NewsService::new(&context),
            notes: NoteService::new(&context),
            calendar: Arc::new(BookingRangeCache::new(backend, clock, &config)),
            context,
            config,
        }
    }
}
