use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};

// Source of "now" in the business timezone. Past-date checks and the
// today/tomorrow decision must not depend on the host's local zone.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<FixedOffset>;

    fn now_naive(&self) -> NaiveDateTime {
        self.now().naive_local()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn tomorrow(&self) -> NaiveDate {
        self.today().succ_opt().unwrap_or_else(|| self.today())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BusinessClock {
    offset: FixedOffset,
}

impl BusinessClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl Clock for BusinessClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

// Frozen clock for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: DateTime<FixedOffset>,
}

impl FixedClock {
    pub fn new(at: DateTime<FixedOffset>) -> Self {
        Self { at }
    }

    /// Builds a clock from a business-local wall time such as
    /// `"2026-01-26 08:00:00"`. Returns `None` if the text does not parse.
    pub fn at_local(local: &str, offset: FixedOffset) -> Option<Self> {
        let naive = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S").ok()?;
        let at = naive.and_local_timezone(offset).single()?;
        Some(Self { at })
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.at
    }
}
