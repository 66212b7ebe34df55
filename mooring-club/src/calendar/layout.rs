use chrono::{Duration, FixedOffset, NaiveDate};

use super::local_midnight;
use crate::{sort_bookings, BookingData};

/// Where a booking is drawn in a day column.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingBlock {
    pub booking_id: String,
    /// Position inside the overlap group, starting at 0
    pub column: usize,
    /// Size of the overlap group
    pub columns: usize,
    pub left_percent: f32,
    pub width_percent: f32,
    pub top: f32,
    pub height: f32,
    /// Whether the booking shares time with any other booking that day
    pub overlapping: bool,
}

/// Lays out the bookings touching `day` side by side.
///
/// Each booking's group is itself plus every booking it overlaps. The group is ordered
/// by start then id, and the booking takes the column at its index. Blocks are clipped
/// to the day, so a booking running past midnight ends at the bottom.
pub fn layout_day(
    bookings: &[BookingData],
    day: NaiveDate,
    offset: FixedOffset,
    pixels_per_minute: f32,
) -> Vec<BookingBlock> {
    let day_start = local_midnight(day, offset);
    let day_end = day_start + Duration::days(1);

    let mut today: Vec<BookingData> = bookings
        .iter()
        .filter(|b| b.start < day_end && b.end > day_start)
        .cloned()
        .collect();
    sort_bookings(&mut today);

    today
        .iter()
        .map(|booking| {
            let group: Vec<&BookingData> = today
                .iter()
                .filter(|other| other.id == booking.id || booking.overlaps(other))
                .collect();

            // `today` is sorted, so the group is too
            let column = group
                .iter()
                .position(|other| other.id == booking.id)
                .unwrap_or(0);
            let columns = group.len();
            let width = 100.0 / columns as f32;

            let start = booking.start.max(day_start);
            let end = booking.end.min(day_end);

            BookingBlock {
                booking_id: booking.id.clone(),
                column,
                columns,
                left_percent: column as f32 * width,
                width_percent: width,
                top: (start - day_start).num_minutes() as f32 * pixels_per_minute,
                height: (end - start).num_minutes() as f32 * pixels_per_minute,
                overlapping: columns > 1,
            }
        })
        .collect()
}
