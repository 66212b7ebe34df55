use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use mooring_core::{
    decode_all, observer, Backend, BackendError, Direction, Document, FieldEnum, FilterOp, Query,
    ObserverId, ObserverSet, Record, SharedClock, SharedObserver, Subscription,
};
use parking_lot::{Mutex, ReentrantMutex};

use super::{base_window, Horizon, Window};
use crate::{sort_bookings, BookingData, BookingStatus, Config, Role};

pub type BookingsObserver = SharedObserver<Vec<BookingData>>;

#[derive(Default)]
struct RangeState {
    window: Option<Window>,
    /// Bumped whenever the backend subscription is replaced or closed, so snapshots
    /// from an older subscription are ignored.
    generation: u64,
    subscription: Option<Subscription>,
    snapshot: Option<Vec<BookingData>>,
}

/// The watched range of one role and everyone listening to it.
struct RangeEntry {
    role: Role,
    /// Held while snapshots are handed to listeners, so a new listener's stale copy
    /// can't land after a fresher snapshot. Taken before `state`.
    emit: ReentrantMutex<()>,
    state: Mutex<RangeState>,
    observers: ObserverSet<Vec<BookingData>>,
}

impl RangeEntry {
    fn new(role: Role) -> Arc<Self> {
        Arc::new(Self {
            role,
            emit: ReentrantMutex::new(()),
            state: Default::default(),
            observers: ObserverSet::new(),
        })
    }

    fn receive(&self, generation: u64, window: Window, documents: &[Document]) {
        let mut bookings: Vec<BookingData> = decode_all(documents);
        bookings.retain(|b| window.overlaps(b.start, b.end));
        sort_bookings(&mut bookings);

        let _emit = self.emit.lock();
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.snapshot = Some(bookings.clone());
        }

        self.observers.notify(&bookings);
    }

    fn fail(&self, generation: u64, error: &BackendError) {
        let _emit = self.emit.lock();
        if self.state.lock().generation != generation {
            return;
        }

        warn!("Booking range for {} failed: {}", self.role, error);
        self.observers.notify_error(error);
    }

    /// Removes a listener. The last one out closes the backend subscription but
    /// leaves the window and snapshot in place.
    fn release(&self, id: ObserverId<Vec<BookingData>>) {
        let closed = {
            let mut state = self.state.lock();

            if self.observers.remove(id) > 0 {
                return;
            }

            state.generation += 1;
            state.subscription.take()
        };

        if closed.is_some() {
            debug!("Closing booking range for {}, no listeners left", self.role);
        }
    }
}

/// Shares one live booking query per role between every calendar view.
///
/// Each role watches a single week-aligned window that only ever grows. Asking for a
/// range inside the window reuses the open subscription; asking for more widens the
/// window and reopens the subscription over the union.
pub struct BookingRangeCache<B: Backend + ?Sized> {
    backend: Arc<B>,
    clock: SharedClock,
    config: Config,
    user: Arc<RangeEntry>,
    admin: Arc<RangeEntry>,
}

impl<B: Backend + ?Sized> BookingRangeCache<B> {
    pub fn new(backend: Arc<B>, clock: SharedClock, config: &Config) -> Self {
        Self {
            backend,
            clock,
            config: config.clone(),
            user: RangeEntry::new(Role::User),
            admin: RangeEntry::new(Role::Admin),
        }
    }

    fn entry(&self, role: Role) -> &Arc<RangeEntry> {
        match role {
            Role::User => &self.user,
            Role::Admin => &self.admin,
        }
    }

    /// The window a role starts with before anything wider is asked for.
    pub fn base_window(&self, role: Role) -> Window {
        let now = self.clock.now();
        let offset = self.config.utc_offset;

        match role {
            Role::User => base_window(
                now,
                offset,
                self.config.member_weeks_before,
                Horizon::Weeks(self.config.member_weeks_after),
            ),
            Role::Admin => base_window(
                now,
                offset,
                self.config.admin_weeks_before,
                Horizon::Months(self.config.admin_months_after),
            ),
        }
    }

    /// The window currently watched for a role, if any.
    pub fn window(&self, role: Role) -> Option<Window> {
        self.entry(role).state.lock().window
    }

    /// The last snapshot received for a role.
    pub fn snapshot(&self, role: Role) -> Option<Vec<BookingData>> {
        self.entry(role).state.lock().snapshot.clone()
    }

    /// How many listeners a role has.
    pub fn listeners(&self, role: Role) -> usize {
        self.entry(role).observers.len()
    }

    /// Registers a listener for bookings between `start` and `end`.
    ///
    /// The listener receives the last known snapshot right away, if there is one, then
    /// every snapshot of the role's window until the returned handle is dropped.
    pub fn subscribe(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        observer: BookingsObserver,
        role: Role,
    ) -> RangeSubscription {
        let entry = self.entry(role);
        let requested = Window::new(start, end).aligned(self.config.utc_offset);

        let emit = entry.emit.lock();
        let (id, stale, open, replaced) = {
            let mut state = entry.state.lock();

            let current = state.window.unwrap_or_else(|| self.base_window(role));
            let widened = current.union(&requested);

            let reopen = state.window != Some(widened) || state.subscription.is_none();
            let mut replaced = None;
            let mut open = None;

            if reopen {
                state.generation += 1;
                state.window = Some(widened);
                replaced = state.subscription.take();
                open = Some((state.generation, widened));
            }

            let id = entry.observers.insert(observer.clone());
            (id, state.snapshot.clone(), open, replaced)
        };

        if let Some(snapshot) = stale {
            observer.on_next(&snapshot);
        }

        drop(emit);
        drop(replaced);

        if let Some((generation, window)) = open {
            self.open(entry, generation, window);
        }

        RangeSubscription {
            entry: entry.clone(),
            id: Some(id),
        }
    }

    fn open(&self, entry: &Arc<RangeEntry>, generation: u64, window: Window) {
        debug!(
            "Watching bookings for {} from {} to {}",
            entry.role, window.start, window.end
        );

        let on_next = Arc::downgrade(entry);
        let on_error = Arc::downgrade(entry);

        let subscription = self.backend.subscribe_query(
            range_query(&window, entry.role),
            observer(
                move |documents: &Vec<Document>| {
                    if let Some(entry) = Weak::upgrade(&on_next) {
                        entry.receive(generation, window, documents)
                    }
                },
                move |e: &BackendError| {
                    if let Some(entry) = Weak::upgrade(&on_error) {
                        entry.fail(generation, e)
                    }
                },
            ),
        );

        let stale = {
            let mut state = entry.state.lock();
            if state.generation != generation {
                // Replaced or closed while opening
                Some(subscription)
            } else {
                state.subscription = Some(subscription);
                None
            }
        };

        drop(stale);
    }
}

impl<B: Backend + ?Sized> Drop for BookingRangeCache<B> {
    fn drop(&mut self) {
        for entry in [&self.user, &self.admin] {
            let closed = {
                let mut state = entry.state.lock();
                state.generation += 1;
                state.subscription.take()
            };

            drop(closed);
        }
    }
}

/// The backend query for a role's window. Members never see rejected bookings.
fn range_query(window: &Window, role: Role) -> Query {
    let query = Query::collection(BookingData::COLLECTION)
        .filter("startTime", FilterOp::LessThan, window.end)
        .filter("endTime", FilterOp::GreaterThan, window.start)
        .order_by("startTime", Direction::Ascending);

    match role {
        Role::Admin => query,
        Role::User => query.filter(
            "status",
            FilterOp::In,
            BookingStatus::MEMBER_VISIBLE
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>(),
        ),
    }
}

/// A registered range listener. Dropping it unregisters only that listener.
#[must_use = "dropping a range subscription unregisters the listener"]
pub struct RangeSubscription {
    entry: Arc<RangeEntry>,
    id: Option<ObserverId<Vec<BookingData>>>,
}

impl RangeSubscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.entry.release(id)
        }
    }
}

impl Drop for RangeSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        thread,
    };

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use mooring_core::{
        fields, implementors::MemoryBackend, DocumentObserver, DocumentPath, Fields, FixedClock,
        QueryObserver,
    };

    use super::*;

    type Seen = Arc<Mutex<Vec<Vec<String>>>>;
    type Errors = Arc<Mutex<Vec<BackendError>>>;

    // Wednesday
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap()
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, h, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryBackend>, BookingRangeCache<MemoryBackend>) {
        let clock: SharedClock = Arc::new(FixedClock::new(now()));
        let backend = Arc::new(MemoryBackend::new(clock.clone()));
        let cache = BookingRangeCache::new(backend.clone(), clock, &Config::default());

        (backend, cache)
    }

    fn recorder() -> (BookingsObserver, Seen, Errors) {
        let seen: Seen = Default::default();
        let errors: Errors = Default::default();

        let observer = {
            let seen = seen.clone();
            let errors = errors.clone();
            observer(
                move |bookings: &Vec<BookingData>| {
                    seen.lock().push(bookings.iter().map(|b| b.id.clone()).collect())
                },
                move |e: &BackendError| errors.lock().push(e.clone()),
            )
        };

        (observer, seen, errors)
    }

    async fn book(backend: &MemoryBackend, id: &str, start: DateTime<Utc>, status: &str) {
        backend
            .set(
                &DocumentPath::new("bookings", id),
                fields! {
                    "userId" => "u1",
                    "userName" => "Ada",
                    "yachtIds" => vec!["y1"],
                    "yachtNames" => vec!["Orion"],
                    "startTime" => start,
                    "endTime" => start + Duration::hours(1),
                    "status" => status,
                },
                false,
            )
            .await
            .unwrap();
    }

    fn last(seen: &Seen) -> Vec<String> {
        seen.lock().last().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn requests_inside_the_window_reuse_the_subscription() {
        let (backend, cache) = setup();

        let (first, _, _) = recorder();
        let _a = cache.subscribe(at(5, 0), at(6, 0), first, Role::User);
        assert_eq!(backend.subscriptions_opened(), 1);

        let base = cache.base_window(Role::User);
        assert_eq!(cache.window(Role::User), Some(base));

        let (second, _, _) = recorder();
        let _b = cache.subscribe(at(10, 0), at(12, 0), second, Role::User);

        assert_eq!(backend.subscriptions_opened(), 1);
        assert_eq!(backend.live_subscriptions(), 1);
        assert_eq!(cache.window(Role::User), Some(base));
    }

    #[tokio::test]
    async fn requests_beyond_the_window_widen_it_to_whole_weeks() {
        let (backend, cache) = setup();

        let (first, _, _) = recorder();
        let _a = cache.subscribe(at(5, 0), at(6, 0), first, Role::User);
        let base = cache.window(Role::User).unwrap();

        // Ends on a Thursday, well past the base window
        let far = Utc.with_ymd_and_hms(2024, 7, 11, 15, 0, 0).unwrap();
        let (second, _, _) = recorder();
        let _b = cache.subscribe(at(5, 0), far, second, Role::User);

        let widened = cache.window(Role::User).unwrap();
        assert_eq!(widened.start, base.start);
        assert_eq!(widened.end, Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap());

        assert_eq!(backend.subscriptions_opened(), 2);
        assert_eq!(backend.live_subscriptions(), 1, "the old subscription is closed");

        // Starts on a Thursday, before the base window
        let early = Utc.with_ymd_and_hms(2024, 5, 9, 10, 0, 0).unwrap();
        let (third, _, _) = recorder();
        let _c = cache.subscribe(early, at(6, 0), third, Role::User);

        let widened = cache.window(Role::User).unwrap();
        assert_eq!(base.start, Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap());
        assert_eq!(widened.start, Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap());
        assert_eq!(widened.end, Utc.with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap());

        assert_eq!(backend.subscriptions_opened(), 3);
        assert_eq!(backend.live_subscriptions(), 1);
    }

    #[tokio::test]
    async fn later_listeners_get_the_last_snapshot_right_away() {
        let (backend, cache) = setup();
        book(&backend, "b1", at(6, 10), "approved").await;

        let (first, first_seen, _) = recorder();
        let _a = cache.subscribe(at(5, 0), at(6, 0), first, Role::User);
        assert_eq!(last(&first_seen), vec!["b1"]);

        let (second, second_seen, _) = recorder();
        let _b = cache.subscribe(at(5, 0), at(6, 0), second, Role::User);

        assert_eq!(second_seen.lock().len(), 1);
        assert_eq!(last(&second_seen), vec!["b1"]);
    }

    #[tokio::test]
    async fn unregistering_one_listener_keeps_the_other() {
        let (backend, cache) = setup();

        let (first, first_seen, _) = recorder();
        let a = cache.subscribe(at(5, 0), at(6, 0), first, Role::User);
        let (second, second_seen, _) = recorder();
        let _b = cache.subscribe(at(5, 0), at(6, 0), second, Role::User);

        a.unsubscribe();
        assert_eq!(cache.listeners(Role::User), 1);

        let received = first_seen.lock().len();
        book(&backend, "b1", at(6, 10), "pending").await;

        assert_eq!(last(&second_seen), vec!["b1"]);
        assert_eq!(first_seen.lock().len(), received);
    }

    #[tokio::test]
    async fn only_admins_see_rejected_bookings() {
        let (backend, cache) = setup();
        book(&backend, "approved", at(6, 10), "approved").await;
        book(&backend, "rejected", at(6, 12), "rejected").await;
        book(&backend, "cancelled", at(6, 14), "cancelled").await;

        let (user, user_seen, _) = recorder();
        let _u = cache.subscribe(at(5, 0), at(6, 0), user, Role::User);
        let (admin, admin_seen, _) = recorder();
        let _a = cache.subscribe(at(5, 0), at(6, 0), admin, Role::Admin);

        assert_eq!(last(&user_seen), vec!["approved", "cancelled"]);
        assert_eq!(last(&admin_seen), vec!["approved", "rejected", "cancelled"]);
    }

    #[tokio::test]
    async fn snapshots_are_sorted_and_limited_to_the_window() {
        let (backend, cache) = setup();
        book(&backend, "b", at(6, 10), "approved").await;
        book(&backend, "a", at(6, 10), "approved").await;
        book(&backend, "early", at(4, 8), "approved").await;
        book(&backend, "outside", Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap(), "approved").await;

        let (listener, seen, _) = recorder();
        let _s = cache.subscribe(at(5, 0), at(6, 0), listener, Role::User);

        assert_eq!(last(&seen), vec!["early", "a", "b"]);
    }

    #[tokio::test]
    async fn errors_reach_every_listener_and_keep_the_snapshot() {
        let (backend, cache) = setup();
        book(&backend, "b1", at(6, 10), "approved").await;

        let (first, _, first_errors) = recorder();
        let _a = cache.subscribe(at(5, 0), at(6, 0), first, Role::User);
        let (second, _, second_errors) = recorder();
        let _b = cache.subscribe(at(5, 0), at(6, 0), second, Role::User);

        backend.fail_subscriptions(BackendError::Unauthenticated);

        assert_eq!(*first_errors.lock(), vec![BackendError::Unauthenticated]);
        assert_eq!(*second_errors.lock(), vec![BackendError::Unauthenticated]);

        let snapshot = cache.snapshot(Role::User).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(backend.subscriptions_opened(), 1, "nothing retries");
    }

    #[tokio::test]
    async fn last_listener_out_closes_the_subscription_but_keeps_it_warm() {
        let (backend, cache) = setup();
        book(&backend, "b1", at(6, 10), "approved").await;

        let (first, _, _) = recorder();
        let a = cache.subscribe(at(5, 0), at(6, 0), first, Role::User);
        let window = cache.window(Role::User);

        drop(a);
        assert_eq!(backend.live_subscriptions(), 0);
        assert_eq!(cache.window(Role::User), window);
        assert!(cache.snapshot(Role::User).is_some());

        let (second, second_seen, _) = recorder();
        let _b = cache.subscribe(at(5, 0), at(6, 0), second, Role::User);

        assert_eq!(second_seen.lock()[0], vec!["b1"], "warm snapshot first");
        assert_eq!(backend.subscriptions_opened(), 2);
        assert_eq!(backend.live_subscriptions(), 1);
    }

    #[tokio::test]
    async fn dropping_the_cache_releases_everything() {
        let (backend, cache) = setup();

        let (listener, _, _) = recorder();
        let _subscription = cache.subscribe(at(5, 0), at(6, 0), listener, Role::Admin);
        assert_eq!(backend.live_subscriptions(), 1);

        drop(cache);
        assert_eq!(backend.live_subscriptions(), 0);
    }

    /// Hands the range query's observer to the test instead of delivering anything.
    #[derive(Default)]
    struct ManualBackend {
        upstream: Mutex<Option<QueryObserver>>,
    }

    #[async_trait]
    impl Backend for ManualBackend {
        async fn get(&self, _: &DocumentPath) -> mooring_core::Result<Option<Document>> {
            Ok(None)
        }

        async fn set(&self, _: &DocumentPath, _: Fields, _: bool) -> mooring_core::Result<()> {
            Ok(())
        }

        async fn update(&self, _: &DocumentPath, _: Fields) -> mooring_core::Result<()> {
            Ok(())
        }

        async fn add(&self, _: &str, _: Fields) -> mooring_core::Result<String> {
            Ok(String::new())
        }

        async fn query(&self, _: &Query) -> mooring_core::Result<Vec<Document>> {
            Ok(vec![])
        }

        fn subscribe_query(&self, _: Query, observer: QueryObserver) -> Subscription {
            *self.upstream.lock() = Some(observer);
            Subscription::detached()
        }

        fn subscribe_document(&self, _: DocumentPath, _: DocumentObserver) -> Subscription {
            Subscription::detached()
        }
    }

    /// A one-booking snapshot carrying a sequence number in the user name.
    fn numbered(n: u64) -> Vec<Document> {
        vec![Document::new(
            "b1",
            fields! {
                "userId" => "u1",
                "userName" => format!("{:010}", n),
                "yachtIds" => vec!["y1"],
                "yachtNames" => vec!["Orion"],
                "startTime" => at(6, 10),
                "endTime" => at(6, 11),
                "status" => "approved",
            },
        )]
    }

    #[test]
    fn new_listeners_never_end_on_an_older_snapshot() {
        let clock: SharedClock = Arc::new(FixedClock::new(now()));
        let backend = Arc::new(ManualBackend::default());
        let cache = BookingRangeCache::new(backend.clone(), clock, &Config::default());

        let (anchor, _, _) = recorder();
        let _anchor = cache.subscribe(at(5, 0), at(6, 0), anchor, Role::User);
        let upstream = backend.upstream.lock().clone().unwrap();
        upstream.on_next(&numbered(0));

        let done = Arc::new(AtomicBool::new(false));
        let emitter = {
            let done = done.clone();
            thread::spawn(move || {
                let mut n = 1;
                while !done.load(Ordering::SeqCst) {
                    upstream.on_next(&numbered(n));
                    n += 1;
                }
            })
        };

        for _ in 0..20_000 {
            let seen: Arc<Mutex<Vec<u64>>> = Default::default();
            let listener = {
                let seen = seen.clone();
                observer(
                    move |bookings: &Vec<BookingData>| {
                        let n = bookings[0].user_name.parse().unwrap();
                        seen.lock().push(n)
                    },
                    |_: &BackendError| {},
                )
            };

            let subscription = cache.subscribe(at(5, 0), at(6, 0), listener, Role::User);
            drop(subscription);

            let seen = seen.lock();
            assert!(!seen.is_empty(), "the last snapshot arrives right away");
            assert!(
                seen.windows(2).all(|w| w[0] <= w[1]),
                "went backwards: {:?}",
                *seen
            );
        }

        done.store(true, Ordering::SeqCst);
        emitter.join().unwrap();
        assert_eq!(cache.listeners(Role::User), 1);
    }
}
