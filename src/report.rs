//! Structured event reporting.
//!
//! Components never log through a global logger. They receive an
//! `EventSink` and push `Event`s carrying where the event happened (station,
//! year, field, runs). `EventLog` keeps every event for later inspection and
//! forwards it to `tracing`.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::fields::FieldKey;
use crate::run_id::StationCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "DEBUG"),
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    DailyParser,
    RunAssembler,
    OverlapStitcher,
    CrossYearStitcher,
    MultiYear,
    ErrorScan,
    Driver,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::DailyParser => "daily-parser",
            Component::RunAssembler => "run-assembler",
            Component::OverlapStitcher => "overlap-stitcher",
            Component::CrossYearStitcher => "cross-year-stitcher",
            Component::MultiYear => "multi-year",
            Component::ErrorScan => "error-scan",
            Component::Driver => "driver",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub component: Component,
    pub severity: Severity,
    pub station: Option<StationCode>,
    pub year: Option<i32>,
    pub field: Option<FieldKey>,
    /// Run indices (or years, for cross-year events) involved.
    pub runs: Vec<usize>,
    pub message: String,
}

impl Event {
    pub fn new(component: Component, severity: Severity, message: impl Into<String>) -> Self {
        Event {
            component,
            severity,
            station: None,
            year: None,
            field: None,
            runs: Vec::new(),
            message: message.into(),
        }
    }

    pub fn info(component: Component, message: impl Into<String>) -> Self {
        Self::new(component, Severity::Info, message)
    }

    pub fn warning(component: Component, message: impl Into<String>) -> Self {
        Self::new(component, Severity::Warning, message)
    }

    pub fn error(component: Component, message: impl Into<String>) -> Self {
        Self::new(component, Severity::Error, message)
    }

    pub fn station(mut self, station: &StationCode) -> Self {
        self.station = Some(station.clone());
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn field(mut self, field: FieldKey) -> Self {
        self.field = Some(field);
        self
    }

    pub fn runs(mut self, runs: &[usize]) -> Self {
        self.runs = runs.to_vec();
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;
        if let Some(station) = &self.station {
            write!(f, " [{}]", station)?;
        }
        if let Some(year) = self.year {
            write!(f, " [{}]", year)?;
        }
        if let Some(field) = &self.field {
            write!(f, " [{}]", field)?;
        }
        if !self.runs.is_empty() {
            let runs: Vec<String> = self.runs.iter().map(|r| r.to_string()).collect();
            write!(f, " [runs {}]", runs.join(","))?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Port through which components report what they did.
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

/// Sink that keeps every event and mirrors it to `tracing`.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.events().iter().filter(|e| e.severity == severity).count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.severity == Severity::Warning)
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: Event) {
        match event.severity {
            Severity::Debug => debug!("{}", event),
            Severity::Info => info!("{}", event),
            Severity::Warning => warn!("{}", event),
            Severity::Error => error!("{}", event),
        }
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn test_event_display_includes_context() {
        let station = StationCode::parse("tela").unwrap();
        let event = Event::warning(Component::OverlapStitcher, "skipping pair")
            .station(&station)
            .year(2019)
            .field(FieldKey::value(Field::WetZ))
            .runs(&[3, 4]);
        assert_eq!(
            event.to_string(),
            "[overlap-stitcher] [TELA] [2019] [WetZ] [runs 3,4]: skipping pair"
        );
    }

    #[test]
    fn test_event_log_collects() {
        let mut log = EventLog::new();
        log.emit(Event::info(Component::Driver, "start"));
        log.emit(Event::warning(Component::Driver, "odd"));
        log.emit(Event::warning(Component::Driver, "odder"));
        assert_eq!(log.events().len(), 3);
        assert_eq!(log.count(Severity::Warning), 2);
        assert_eq!(log.warnings().count(), 2);
    }
}
