use chrono::{FixedOffset, Offset, Utc};

/// The configuration of the club client
#[derive(Debug, Clone)]
pub struct Config {
    /// The club's local time. Calendar weeks start on Monday 00:00 in this offset.
    pub utc_offset: FixedOffset,
    /// How many weeks before today a member's calendar watches by default
    pub member_weeks_before: i64,
    /// How many weeks after today a member's calendar watches by default
    pub member_weeks_after: i64,
    /// How many weeks before today an admin's calendar watches by default
    pub admin_weeks_before: i64,
    /// How many months after today an admin's calendar watches by default
    pub admin_months_after: u32,
    /// Height of one minute in the day view
    pub pixels_per_minute: f32,
}

impl Config {
    /// Builds a config for the given offset in minutes east of UTC.
    /// Out-of-range offsets fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        Self {
            utc_offset: minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .unwrap_or_else(utc),
            ..Default::default()
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            utc_offset: utc(),
            member_weeks_before: 2,
            member_weeks_after: 2,
            admin_weeks_before: 2,
            admin_months_after: 1,
            // An hour is 60 pixels tall
            pixels_per_minute: 1.0,
        }
    }
}
