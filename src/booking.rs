//! Booking records and the client-side predicate used to slice the cached collection.

use std::fmt::Display;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::traits::CollectionRecord;
use crate::traits::RecordFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
}

impl Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::CheckedIn => "checked-in",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id:             i64,
    pub location_id:    i64,
    pub customer_id:    Option<i64>,
    pub customer_name:  String,
    pub customer_email: String,
    pub reference:      String,
    pub date:           NaiveDate,
    pub time:           NaiveTime,
    pub guests:         u32,
    pub status:         BookingStatus,
    pub total_amount:   f64,
    pub amount_paid:    f64,
    pub payment_status: PaymentStatus,
    pub created_at:     DateTime<Utc>,
}

impl Booking {
    pub fn balance_due(&self) -> f64 {
        (self.total_amount - self.amount_paid).max(0.0)
    }
}

impl CollectionRecord for Booking {
    fn id(&self) -> i64 {
        self.id
    }
}

/// Every set criterion must match. An empty filter matches everything.
///
/// ```ignore
/// let todays = BookingFilter::default()
///     .with_location(17)
///     .with_date(today)
///     .with_status(BookingStatus::Confirmed);
/// let rows = cache.read(Some(&todays)).await;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingFilter {
    pub location_id: Option<i64>,
    pub status:      Option<BookingStatus>,
    pub date:        Option<NaiveDate>,
    pub date_from:   Option<NaiveDate>,
    pub date_to:     Option<NaiveDate>,
    pub customer_id: Option<i64>,
    /// Case-insensitive substring over customer name, email and booking reference.
    pub search:      Option<String>,
}

impl BookingFilter {
    pub fn with_location(mut self, location_id: i64) -> Self {
        self.location_id = Some(location_id);
        self
    }

    pub fn with_status(mut self, status: BookingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Inclusive on both ends. Either end may be left open with `None`.
    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_customer(mut self, customer_id: i64) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_search<S: Into<String>>(mut self, text: S) -> Self {
        self.search = Some(text.into());
        self
    }

    fn matches_search(&self, booking: &Booking) -> bool {
        let Some(needle) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
        else {
            return true;
        };
        let needle = needle.to_lowercase();
        [&booking.customer_name, &booking.customer_email, &booking.reference]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

impl RecordFilter<Booking> for BookingFilter {
    fn matches(&self, booking: &Booking) -> bool {
        self.location_id.is_none_or(|id| booking.location_id == id)
            && self.status.is_none_or(|status| booking.status == status)
            && self.date.is_none_or(|date| booking.date == date)
            && self.date_from.is_none_or(|from| booking.date >= from)
            && self.date_to.is_none_or(|to| booking.date <= to)
            && self.customer_id.is_none_or(|id| booking.customer_id == Some(id))
            && self.matches_search(booking)
    }
}
