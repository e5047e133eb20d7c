//! Departure fallback resolver
//!
//! When the primary feed has no departure data, the nearest departures are
//! scraped from a public timetable page instead. The page lists one
//! `li.timetable-departures-entry` per departure, each holding a line number
//! tile and an `HH:MM` hour. For every line of interest the resolver keeps the
//! departures that have not left yet, takes the nearest `count` of them and
//! joins them as `HH:MM|HH:MM|...`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::config::FallbackConfig;
use crate::error::{Result, SyncError};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Selector matching one departure entry
pub const ENTRY_SELECTOR: &str = "li.timetable-departures-entry";

/// Selector for the line number inside an entry
pub const LINE_SELECTOR: &str = "a.timetable-button-tile";

/// Selector for the departure hour inside an entry
pub const HOUR_SELECTOR: &str = "div.timetable-departures-entry-hour";

/// Placeholder replaced by the current date in the URL template
pub const DATE_PLACEHOLDER: &str = "{date}";

const TIME_FORMAT: &str = "%H:%M";
const DEPARTURE_SEPARATOR: &str = "|";

// ----------------------------------------------------------------------------
// Clock
// ----------------------------------------------------------------------------

/// Source of the current local date and time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in the host's local time zone
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    pub fn at(date: NaiveDate, time: NaiveTime) -> Self {
        Self(date.and_time(time))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

// ----------------------------------------------------------------------------
// Timetable Parsing
// ----------------------------------------------------------------------------

/// Why a single timetable entry was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySkip {
    MissingLine,
    MissingHour,
    MalformedTime(String),
}

/// One parsed departure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub line: String,
    pub time: NaiveTime,
}

/// Departure times per line of interest, in page order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartureTable {
    lines: BTreeMap<String, Vec<NaiveTime>>,
}

impl DepartureTable {
    /// Empty table tracking the given lines
    pub fn for_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        Self {
            lines: lines
                .iter()
                .map(|line| (line.as_ref().to_string(), Vec::new()))
                .collect(),
        }
    }

    /// Record a departure; departures for untracked lines are ignored
    pub fn record(&mut self, departure: Departure) -> bool {
        match self.lines.get_mut(&departure.line) {
            Some(times) => {
                times.push(departure.time);
                true
            }
            None => false,
        }
    }

    pub fn times(&self, line: &str) -> Option<&[NaiveTime]> {
        self.lines.get(line).map(Vec::as_slice)
    }

    /// Nearest `count` departures at or after `now` for every tracked line,
    /// formatted as `HH:MM` joined by `|`
    pub fn nearest(&self, now: NaiveTime, count: usize) -> BTreeMap<String, String> {
        self.lines
            .iter()
            .map(|(line, times)| (line.clone(), format_nearest(times, now, count)))
            .collect()
    }
}

/// Format the first `count` times not earlier than `now`, ascending.
///
/// The sort is stable, so duplicate departures keep their page order.
pub fn format_nearest(times: &[NaiveTime], now: NaiveTime, count: usize) -> String {
    let mut upcoming: Vec<NaiveTime> = times.iter().copied().filter(|t| *t >= now).collect();
    upcoming.sort();

    upcoming
        .iter()
        .take(count)
        .map(|t| t.format(TIME_FORMAT).to_string())
        .collect::<Vec<_>>()
        .join(DEPARTURE_SEPARATOR)
}

/// Compiled selectors for the timetable markup
#[derive(Debug, Clone)]
pub struct TimetableParser {
    entry: Selector,
    line: Selector,
    hour: Selector,
}

impl TimetableParser {
    /// Parser for the default timetable markup
    pub fn new() -> Result<Self> {
        Self::with_selectors(ENTRY_SELECTOR, LINE_SELECTOR, HOUR_SELECTOR)
    }

    pub fn with_selectors(entry: &str, line: &str, hour: &str) -> Result<Self> {
        Ok(Self {
            entry: compile_selector(entry)?,
            line: compile_selector(line)?,
            hour: compile_selector(hour)?,
        })
    }

    /// Parse every departure entry in `html`.
    ///
    /// Entries that cannot be parsed are returned as skips rather than
    /// aborting the whole page.
    pub fn parse(&self, html: &str) -> Vec<std::result::Result<Departure, EntrySkip>> {
        let document = Html::parse_document(html);
        document
            .select(&self.entry)
            .map(|entry| self.parse_entry(entry))
            .collect()
    }

    fn parse_entry(&self, entry: ElementRef<'_>) -> std::result::Result<Departure, EntrySkip> {
        let line = entry
            .select(&self.line)
            .next()
            .map(element_text)
            .ok_or(EntrySkip::MissingLine)?;
        let hour = entry
            .select(&self.hour)
            .next()
            .map(element_text)
            .ok_or(EntrySkip::MissingHour)?;

        let time = NaiveTime::parse_from_str(&hour, TIME_FORMAT)
            .map_err(|_| EntrySkip::MalformedTime(hour.clone()))?;

        Ok(Departure { line, time })
    }

    /// Build a departure table for `lines` from timetable markup
    pub fn table<S: AsRef<str>>(&self, html: &str, lines: &[S]) -> DepartureTable {
        let mut table = DepartureTable::for_lines(lines);
        for parsed in self.parse(html) {
            match parsed {
                Ok(departure) => {
                    table.record(departure);
                }
                Err(skip) => debug!("Skipping timetable entry: {:?}", skip),
            }
        }
        table
    }
}

fn compile_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| SyncError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Resolve nearest departures straight from markup
pub fn resolve_markup<S: AsRef<str>>(
    html: &str,
    lines: &[S],
    count: usize,
    now: NaiveTime,
) -> Result<BTreeMap<String, String>> {
    let parser = TimetableParser::new()?;
    Ok(parser.table(html, lines).nearest(now, count))
}

/// Substitute the date placeholder of a timetable URL template
pub fn timetable_url(template: &str, date: NaiveDate) -> String {
    template.replace(DATE_PLACEHOLDER, &date.format("%Y-%m-%d").to_string())
}

// ----------------------------------------------------------------------------
// Fallback Source
// ----------------------------------------------------------------------------

/// Something that can produce formatted departures for a set of lines
#[async_trait]
pub trait FallbackSource: Send + Sync {
    /// Nearest `count` departures per line, keyed by line identifier.
    ///
    /// Failing to reach the source is an error, not an empty result.
    async fn departures(&self, lines: &[String], count: usize)
        -> Result<BTreeMap<String, String>>;
}

/// Scrapes departures from the timetable website
pub struct TimetableResolver {
    client: reqwest::Client,
    url_template: String,
    parser: TimetableParser,
    clock: Arc<dyn Clock>,
}

impl TimetableResolver {
    /// Create a resolver from fallback configuration
    pub fn new(config: &FallbackConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &FallbackConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(SyncError::fallback_unavailable)?;

        Ok(Self {
            client,
            url_template: config.url_template.clone(),
            parser: TimetableParser::new()?,
            clock,
        })
    }

    async fn fetch_markup(&self, url: &str) -> Result<String> {
        debug!("Fetching timetable from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(SyncError::fallback_unavailable)?
            .error_for_status()
            .map_err(SyncError::fallback_unavailable)?;

        response
            .text()
            .await
            .map_err(SyncError::fallback_unavailable)
    }
}

#[async_trait]
impl FallbackSource for TimetableResolver {
    async fn departures(
        &self,
        lines: &[String],
        count: usize,
    ) -> Result<BTreeMap<String, String>> {
        let now = self.clock.now();
        let url = timetable_url(&self.url_template, now.date());
        let html = self.fetch_markup(&url).await?;

        let table = self.parser.table(&html, lines);
        let nearest = table.nearest(now.time(), count);
        if nearest.values().all(String::is_empty) {
            warn!("Timetable has no upcoming departures for lines {:?}", lines);
        }
        debug!("Nearest departures: {:?}", nearest);
        Ok(nearest)
    }
}
