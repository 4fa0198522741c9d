//! Company-listing schema and the calendar date key used for listing histories.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::Date;

crate::timeline_record! {
    /// One exchange listing of a company, as published in the listing master.
    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct CompanyListing {
        SYMBOL => symbol: String,
        NAME => name: String,
        SERIES => series: String,
        ISIN => isin: String,
        FACE_VALUE => face_value: u32,
        MARKET_LOT => market_lot: u32,
    }
}

impl CompanyListing {
    /// Equity-series listing with face value 10 and a market lot of 1.
    #[must_use]
    pub fn new(symbol: &str, name: &str, isin: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            series: "EQ".to_string(),
            isin: isin.to_string(),
            face_value: 10,
            market_lot: 1,
        }
    }
}

const LISTING_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[day]-[month repr:short]-[year]");
const ISO_DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Calendar date rendered as `DD-Mon-YYYY` (e.g. `05-Mar-2020`).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ListingDate(pub Date);

impl ListingDate {
    /// # Errors
    /// Returns a message when the components do not form a valid calendar date.
    pub fn from_ymd(year: i32, month: u8, day: u8) -> Result<Self, String> {
        let month = time::Month::try_from(month).map_err(|err| err.to_string())?;
        Date::from_calendar_date(year, month, day).map(Self).map_err(|err| err.to_string())
    }

    #[must_use]
    pub fn to_iso(self) -> String {
        self.0.format(ISO_DATE_FORMAT).unwrap_or_else(|_| self.0.to_string())
    }
}

impl Display for ListingDate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.format(LISTING_DATE_FORMAT) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for ListingDate {
    type Err = String;

    /// Accepts `DD-Mon-YYYY` or ISO `YYYY-MM-DD`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Date::parse(value, LISTING_DATE_FORMAT)
            .or_else(|_| Date::parse(value, ISO_DATE_FORMAT))
            .map(Self)
            .map_err(|err| format!("invalid listing date `{value}`: {err}"))
    }
}

impl Serialize for ListingDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

impl<'de> Deserialize<'de> for ListingDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
