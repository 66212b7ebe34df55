use std::collections::HashSet;

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{error, info};
use mooring_club::{BookingData, BookingStatus, Club, RangeSubscription, Role};
use mooring_core::{observer, Backend, BackendError};
use tokio::task::spawn_blocking;

/// What the admin feed reports.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Snapshot(Vec<BookingData>),
    Failed(BackendError),
}

#[derive(Debug, Clone)]
pub struct Events {
    sender: Sender<MonitorEvent>,
    receiver: Receiver<MonitorEvent>,
}

impl Default for Events {
    fn default() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }
}

impl Events {
    fn emit(&self, event: MonitorEvent) {
        // The receiver lives as long as the monitor
        let _ = self.sender.send(event);
    }

    async fn next(&self) -> Option<MonitorEvent> {
        let receiver = self.receiver.clone();
        spawn_blocking(move || receiver.recv().ok())
            .await
            .ok()
            .flatten()
    }
}

/// Watches the admin booking window and logs bookings as they start waiting for a
/// decision.
pub struct AdminMonitor {
    events: Events,
    subscription: RangeSubscription,
    pending: HashSet<String>,
}

impl AdminMonitor {
    pub fn start<B: Backend + ?Sized>(club: &Club<B>) -> Self {
        let events = Events::default();
        let window = club.calendar.base_window(Role::Admin);

        let subscription = {
            let snapshots = events.clone();
            let failures = events.clone();

            club.calendar.subscribe(
                window.start,
                window.end,
                observer(
                    move |bookings: &Vec<BookingData>| {
                        snapshots.emit(MonitorEvent::Snapshot(bookings.clone()))
                    },
                    move |e: &BackendError| failures.emit(MonitorEvent::Failed(e.clone())),
                ),
                Role::Admin,
            )
        };

        info!(
            "Watching bookings from {} to {}",
            window.start.format("%Y-%m-%d"),
            window.end.format("%Y-%m-%d")
        );

        Self {
            events,
            subscription,
            pending: HashSet::new(),
        }
    }

    /// Runs until the feed fails.
    pub async fn run(mut self) -> BackendError {
        loop {
            match self.events.next().await {
                Some(MonitorEvent::Snapshot(bookings)) => self.handle_snapshot(&bookings),
                Some(MonitorEvent::Failed(e)) => {
                    error!("The booking feed stopped: {}", e);
                    self.subscription.unsubscribe();
                    return e;
                }
                None => {
                    self.subscription.unsubscribe();
                    return BackendError::Internal("the booking feed closed".to_string());
                }
            }
        }
    }

    fn handle_snapshot(&mut self, bookings: &[BookingData]) {
        let pending: HashSet<String> = bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Pending)
            .map(|b| b.id.clone())
            .collect();

        for booking in bookings.iter().filter(|b| {
            b.status == BookingStatus::Pending && !self.pending.contains(&b.id)
        }) {
            info!(
                "{} asks for {} on {} from {} to {}",
                booking.user_name,
                booking.yacht_names.join(", "),
                booking.start.format("%Y-%m-%d"),
                booking.start.format("%H:%M"),
                booking.end.format("%H:%M"),
            );
        }

        let decided = self.pending.difference(&pending).count();
        if decided > 0 {
            info!(
                "{} bookings left the queue, {} still waiting",
                decided,
                pending.len()
            );
        }

        self.pending = pending;
    }
}
