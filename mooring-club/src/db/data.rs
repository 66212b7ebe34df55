use chrono::{DateTime, Utc};
use mooring_core::{fields, server_timestamp, DecodeError, Document, FieldEnum, FieldReader, Fields, Record};

/// Declares a string-backed field enum with its stored spellings.
macro_rules! field_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl FieldEnum for $name {
            fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

field_enum! {
    /// Where a booking is in its approval lifecycle
    BookingStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Cancelled => "cancelled",
    }
}

impl BookingStatus {
    /// Statuses a member can see. Rejected bookings are only shown to admins.
    pub const MEMBER_VISIBLE: [BookingStatus; 3] = [Self::Pending, Self::Approved, Self::Cancelled];
}

field_enum! {
    /// What a user is allowed to do
    Role {
        User => "user",
        Admin => "admin",
    }
}

field_enum! {
    VerificationStatus {
        ToVerify => "to-verify",
        Verified => "verified",
        Rejected => "rejected",
    }
}

field_enum! {
    YachtStatus {
        Available => "available",
        Maintenance => "maintenance",
        Disabled => "disabled",
    }
}

field_enum! {
    NewsStatus {
        Active => "active",
        Old => "old",
    }
}

/// A reservation of one or more yachts for a time slot
#[derive(Debug, Clone, PartialEq)]
pub struct BookingData {
    pub id: String,
    /// The member who asked for the booking
    pub user_id: String,
    pub user_name: String,
    pub yacht_ids: Vec<String>,
    /// Names at booking time, parallel to `yacht_ids`
    pub yacht_names: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: BookingStatus,
    /// `None` while the server timestamp is still pending
    pub created_at: Option<DateTime<Utc>>,
}

impl BookingData {
    pub fn overlaps(&self, other: &BookingData) -> bool {
        self.start < other.end && self.end > other.start
    }
}

impl Record for BookingData {
    const COLLECTION: &'static str = "bookings";

    fn decode(document: &Document) -> Result<Self, DecodeError> {
        let r = FieldReader::new(Self::COLLECTION, document);

        let booking = Self {
            id: r.id(),
            user_id: r.string("userId")?,
            user_name: r.string_or_default("userName")?,
            yacht_ids: r.string_array("yachtIds")?,
            yacht_names: r.string_array("yachtNames")?,
            start: r.timestamp("startTime")?,
            end: r.timestamp("endTime")?,
            status: r.enumeration("status")?,
            created_at: r.optional_timestamp("createdAt")?,
        };

        if booking.end <= booking.start {
            return Err(r.invalid("end time is not after start time"));
        }

        Ok(booking)
    }
}

/// Sorts bookings by start, breaking ties by id so the order is deterministic.
pub fn sort_bookings(bookings: &mut [BookingData]) {
    bookings.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
}

/// Per-user preference flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    pub notifications_enabled: bool,
    /// Show the pseudonym instead of the real name to other members
    pub show_pseudonym: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            show_pseudonym: false,
        }
    }
}

/// A club member, keyed by the auth uid
#[derive(Debug, Clone, PartialEq)]
pub struct UserData {
    pub id: String,
    pub phone: String,
    pub name: String,
    pub surname: String,
    pub pseudonym: Option<String>,
    pub description: Option<String>,
    pub photo_url: Option<String>,
    pub role: Role,
    pub verification: VerificationStatus,
    pub preferences: Preferences,
    pub created_at: Option<DateTime<Utc>>,
}

impl UserData {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The name other members see.
    pub fn display_name(&self) -> String {
        match (&self.pseudonym, self.preferences.show_pseudonym) {
            (Some(pseudonym), true) if !pseudonym.is_empty() => pseudonym.clone(),
            _ => format!("{} {}", self.name, self.surname).trim().to_string(),
        }
    }
}

impl Record for UserData {
    const COLLECTION: &'static str = "users";

    fn decode(document: &Document) -> Result<Self, DecodeError> {
        let r = FieldReader::new(Self::COLLECTION, document);
        let defaults = Preferences::default();

        Ok(Self {
            id: r.id(),
            phone: r.string("phoneNumber")?,
            name: r.string_or_default("name")?,
            surname: r.string_or_default("surname")?,
            pseudonym: r.optional_string("pseudonym")?,
            description: r.optional_string("description")?,
            photo_url: r.optional_string("photoUrl")?,
            role: r.enumeration_or("role", Role::User)?,
            verification: r.enumeration_or("verificationStatus", VerificationStatus::ToVerify)?,
            preferences: Preferences {
                notifications_enabled: r
                    .bool_or("notificationsEnabled", defaults.notifications_enabled)?,
                show_pseudonym: r.bool_or("showPseudonym", defaults.show_pseudonym)?,
            },
            created_at: r.optional_timestamp("createdAt")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct YachtData {
    pub id: String,
    pub name: String,
    /// The class of boat, e.g. "Omega"
    pub kind: String,
    /// A short label used in the calendar
    pub shortcut: String,
    pub description: String,
    pub image_url: Option<String>,
    pub status: YachtStatus,
}

impl Record for YachtData {
    const COLLECTION: &'static str = "yachts";

    fn decode(document: &Document) -> Result<Self, DecodeError> {
        let r = FieldReader::new(Self::COLLECTION, document);

        Ok(Self {
            id: r.id(),
            name: r.string("name")?,
            kind: r.string_or_default("type")?,
            shortcut: r.string_or_default("shortcut")?,
            description: r.string_or_default("description")?,
            image_url: r.optional_string("imageUrl")?,
            status: r.enumeration("status")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewsData {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    /// After this instant the item should be archived
    pub deactivation_date: Option<DateTime<Utc>>,
    pub status: NewsStatus,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewsData {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.deactivation_date.is_some_and(|d| d <= now)
    }
}

impl Record for NewsData {
    const COLLECTION: &'static str = "news";

    fn decode(document: &Document) -> Result<Self, DecodeError> {
        let r = FieldReader::new(Self::COLLECTION, document);

        Ok(Self {
            id: r.id(),
            title: r.string("title")?,
            description: r.string_or_default("description")?,
            category: r.string_or_default("category")?,
            deactivation_date: r.optional_timestamp("deactivationDate")?,
            status: r.enumeration("status")?,
            created_at: r.optional_timestamp("createdAt")?,
        })
    }
}

/// A message in the internal thread of a booking
#[derive(Debug, Clone, PartialEq)]
pub struct NoteData {
    pub id: String,
    pub booking_id: String,
    pub content: String,
    pub creator_id: String,
    /// Whether the note was written by an admin
    pub is_admin: bool,
    pub read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for NoteData {
    const COLLECTION: &'static str = "notes";

    fn decode(document: &Document) -> Result<Self, DecodeError> {
        let r = FieldReader::new(Self::COLLECTION, document);

        Ok(Self {
            id: r.id(),
            booking_id: r.string("bookingId")?,
            content: r.string("content")?,
            creator_id: r.string("creatorId")?,
            is_admin: r.bool_or("isAdmin", false)?,
            read: r.bool_or("read", false)?,
            created_at: r.optional_timestamp("createdAt")?,
        })
    }
}

/// Oldest first. Notes whose timestamp is still pending go last.
pub fn sort_notes(notes: &mut [NoteData]) {
    notes.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id)));
}

/// Fields stamped on every newly created document.
pub(crate) fn created_now() -> Fields {
    fields! { "createdAt" => server_timestamp() }
}
