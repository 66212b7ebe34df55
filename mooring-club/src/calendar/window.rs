use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveTime, Utc};

/// A half-open interval of time, [start, end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Widens the window outward to whole weeks.
    pub fn aligned(self, offset: FixedOffset) -> Self {
        Self {
            start: week_floor(self.start, offset),
            end: week_ceil(self.end, offset),
        }
    }

    /// The smallest window covering both.
    pub fn union(&self, other: &Window) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn contains(&self, other: &Window) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether [start, end) intersects the window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

/// Local midnight of `date`, as an instant.
pub fn local_midnight(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    (local - Duration::seconds(offset.local_minus_utc() as i64)).and_utc()
}

/// The local date an instant falls on.
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// Monday 00:00 of the week containing `instant`.
pub fn week_floor(instant: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let date = local_date(instant, offset);
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);

    local_midnight(monday, offset)
}

/// The first Monday 00:00 at or after `instant`.
pub fn week_ceil(instant: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let floor = week_floor(instant, offset);

    if floor == instant {
        floor
    } else {
        floor + Duration::weeks(1)
    }
}

/// The window watched before anything wider is requested.
pub fn base_window(
    now: DateTime<Utc>,
    offset: FixedOffset,
    weeks_before: i64,
    after: Horizon,
) -> Window {
    let today = local_date(now, offset);

    let start = today - Duration::weeks(weeks_before);
    let end = match after {
        Horizon::Weeks(weeks) => today + Duration::weeks(weeks),
        Horizon::Months(months) => today
            .checked_add_months(Months::new(months))
            .unwrap_or(NaiveDate::MAX),
    };

    Window::new(local_midnight(start, offset), local_midnight(end, offset)).aligned(offset)
}

/// How far ahead of today a base window reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    Weeks(i64),
    Months(u32),
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn weeks_snap_to_monday_midnight() {
        // 2024-06-05 is a Wednesday
        assert_eq!(week_floor(at(2024, 6, 5, 15), utc()), at(2024, 6, 3, 0));
        assert_eq!(week_ceil(at(2024, 6, 5, 15), utc()), at(2024, 6, 10, 0));

        // Already aligned
        assert_eq!(week_floor(at(2024, 6, 3, 0), utc()), at(2024, 6, 3, 0));
        assert_eq!(week_ceil(at(2024, 6, 3, 0), utc()), at(2024, 6, 3, 0));

        // Sunday belongs to the week that started the Monday before
        assert_eq!(week_floor(at(2024, 6, 9, 23), utc()), at(2024, 6, 3, 0));
    }

    #[test]
    fn weeks_follow_the_local_offset() {
        let warsaw = FixedOffset::east_opt(2 * 3600).unwrap();

        // Sunday 23:00 UTC is already Monday 01:00 in UTC+2
        let instant = at(2024, 6, 9, 23);
        assert_eq!(week_floor(instant, warsaw), at(2024, 6, 9, 22));
    }

    #[test]
    fn base_windows_cover_the_horizon() {
        let now = at(2024, 6, 5, 12);

        let member = base_window(now, utc(), 2, Horizon::Weeks(2));
        assert_eq!(member, Window::new(at(2024, 5, 20, 0), at(2024, 6, 24, 0)));

        let admin = base_window(now, utc(), 2, Horizon::Months(1));
        assert_eq!(admin, Window::new(at(2024, 5, 20, 0), at(2024, 7, 8, 0)));
    }

    #[test]
    fn union_and_containment() {
        let a = Window::new(at(2024, 6, 3, 0), at(2024, 6, 10, 0));
        let b = Window::new(at(2024, 6, 17, 0), at(2024, 6, 24, 0));

        let joined = a.union(&b);
        assert_eq!(joined, Window::new(at(2024, 6, 3, 0), at(2024, 6, 24, 0)));
        assert!(joined.contains(&a) && joined.contains(&b));
        assert!(!a.contains(&joined));

        assert!(a.overlaps(at(2024, 6, 9, 23), at(2024, 6, 10, 1)));
        assert!(!a.overlaps(at(2024, 6, 10, 0), at(2024, 6, 10, 1)));
    }
}
