//! Daily schedule windows.
//!
//! The scheduler never touches the engine itself. It reports what should
//! happen as a [`ScheduleIntent`] and the dispatch loop applies it.

use std::collections::HashSet;

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use marqueeconf::ScheduleEntryConfig;
use tracing::{debug, info};

use crate::playback::ShowRequest;
use crate::status::{PlaybackStatus, StopKind};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule entry {index}: invalid time '{value}'")]
    BadTime { index: usize, value: String },

    #[error("schedule entry {index}: unknown day '{value}'")]
    BadDay { index: usize, value: String },

    #[error("schedule entry {index}: {message}")]
    BadStop { index: usize, message: String },

    #[error("schedule entry {index}: window is empty")]
    EmptyWindow { index: usize },
}

/// What the scheduler wants done this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleIntent {
    Start(ShowRequest),
    Stop(StopKind),
}

pub trait Scheduler {
    /// Startup check: is a show already due?
    fn check_now(&mut self, now: NaiveDateTime, status: PlaybackStatus) -> Option<ScheduleIntent>;

    /// Per-tick evaluation.
    fn tick(&mut self, now: NaiveDateTime, status: PlaybackStatus) -> Option<ScheduleIntent>;
}

/// A parsed `[[schedule]]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub playlist: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub days: HashSet<Weekday>,
    pub repeat: bool,
    pub stop: StopKind,
}

fn parse_time(index: usize, value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| ScheduleError::BadTime {
            index,
            value: value.to_string(),
        })
}

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn parse_days(index: usize, names: &[String]) -> Result<HashSet<Weekday>, ScheduleError> {
    let mut days = HashSet::new();
    for name in names {
        match name.trim().to_ascii_lowercase().as_str() {
            "everyday" | "daily" => days.extend(ALL_DAYS),
            "weekdays" => days.extend(&ALL_DAYS[..5]),
            "weekends" => days.extend(&ALL_DAYS[5..]),
            other => {
                let day = other.parse::<Weekday>().map_err(|_| ScheduleError::BadDay {
                    index,
                    value: name.clone(),
                })?;
                days.insert(day);
            }
        }
    }
    Ok(days)
}

impl ScheduleEntry {
    pub fn from_config(index: usize, config: &ScheduleEntryConfig) -> Result<Self, ScheduleError> {
        let start = parse_time(index, &config.start)?;
        let end = parse_time(index, &config.end)?;
        if start == end {
            return Err(ScheduleError::EmptyWindow { index });
        }
        let stop = config
            .stop
            .parse::<StopKind>()
            .map_err(|message| ScheduleError::BadStop { index, message })?;

        Ok(Self {
            playlist: config.playlist.clone(),
            start,
            end,
            days: parse_days(index, &config.days)?,
            repeat: config.repeat,
            stop,
        })
    }

    /// Whether `now` falls inside the window. A window ending before it
    /// starts runs past midnight and belongs to the day it started on.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        let time = now.time();
        if self.start < self.end {
            self.days.contains(&now.weekday()) && time >= self.start && time < self.end
        } else if time >= self.start {
            self.days.contains(&now.weekday())
        } else if time < self.end {
            let started_on = (now - Duration::days(1)).weekday();
            self.days.contains(&started_on)
        } else {
            false
        }
    }

    fn request(&self) -> ShowRequest {
        ShowRequest::new(self.playlist.clone(), self.repeat)
    }
}

/// Daily windows, highest priority first.
#[derive(Debug, Default)]
pub struct DailyScheduler {
    entries: Vec<ScheduleEntry>,
    was_due: Vec<bool>,
    /// Entry whose show is running, if the scheduler started it.
    active: Option<usize>,
    stop_requested: bool,
}

impl DailyScheduler {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        let was_due = vec![false; entries.len()];
        Self {
            entries,
            was_due,
            active: None,
            stop_requested: false,
        }
    }

    /// Parse enabled entries, keeping configuration order as priority.
    pub fn from_config(configs: &[ScheduleEntryConfig]) -> Result<Self, ScheduleError> {
        let entries = configs
            .iter()
            .enumerate()
            .filter(|(_, c)| c.enabled)
            .map(|(i, c)| ScheduleEntry::from_config(i, c))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Loaded {} schedule entries", entries.len());
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn active_entry(&self) -> Option<&ScheduleEntry> {
        self.active.map(|i| &self.entries[i])
    }

    fn due_now(&self, now: NaiveDateTime) -> Vec<bool> {
        self.entries.iter().map(|e| e.is_due(now)).collect()
    }

    fn start(&mut self, index: usize) -> Option<ScheduleIntent> {
        let entry = &self.entries[index];
        info!(
            "Schedule: starting {} ({}-{})",
            entry.playlist, entry.start, entry.end
        );
        self.active = Some(index);
        self.stop_requested = false;
        Some(ScheduleIntent::Start(entry.request()))
    }
}

impl Scheduler for DailyScheduler {
    fn check_now(&mut self, now: NaiveDateTime, status: PlaybackStatus) -> Option<ScheduleIntent> {
        let due = self.due_now(now);
        if status != PlaybackStatus::Idle {
            // Whatever is due stays pending until the output is free.
            self.was_due = vec![false; due.len()];
            return None;
        }

        let first_due = due.iter().position(|d| *d);
        self.was_due = due;
        match first_due {
            Some(index) => self.start(index),
            None => {
                debug!("Schedule: nothing due at startup");
                None
            }
        }
    }

    fn tick(&mut self, now: NaiveDateTime, status: PlaybackStatus) -> Option<ScheduleIntent> {
        let due = self.due_now(now);
        let held = status != PlaybackStatus::Idle;
        let previously = std::mem::take(&mut self.was_due);
        // A window that opens while another show holds the output is not
        // recorded as seen, so it still starts once the output is free.
        self.was_due = due
            .iter()
            .enumerate()
            .map(|(i, d)| *d && (!held || previously.get(i).copied().unwrap_or(false)))
            .collect();

        if let Some(index) = self.active {
            if status == PlaybackStatus::Idle {
                self.active = None;
                self.stop_requested = false;
            } else if !due[index] && !self.stop_requested && status == PlaybackStatus::Playing {
                self.stop_requested = true;
                let stop = self.entries[index].stop;
                info!("Schedule: window for {} closed", self.entries[index].playlist);
                return Some(ScheduleIntent::Stop(stop));
            } else {
                return None;
            }
        }

        if held {
            return None;
        }
        // Only windows not yet seen start; a show stopped by hand inside its
        // window stays stopped.
        let opened = due
            .iter()
            .zip(previously.iter().chain(std::iter::repeat(&false)))
            .position(|(now_due, was)| *now_due && !*was)?;
        self.start(opened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn config(playlist: &str, start: &str, end: &str) -> ScheduleEntryConfig {
        ScheduleEntryConfig {
            playlist: playlist.into(),
            start: start.into(),
            end: end.into(),
            days: vec!["everyday".into()],
            repeat: true,
            stop: "graceful".into(),
            enabled: true,
        }
    }

    // 2024-06-03 is a Monday.
    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_entry() {
        let mut c = config("evening", "18:00", "23:30:15");
        c.days = vec!["weekends".into(), "Mon".into()];
        c.stop = "now".into();
        let entry = ScheduleEntry::from_config(0, &c).unwrap();
        assert_eq!(entry.end, NaiveTime::from_hms_opt(23, 30, 15).unwrap());
        assert_eq!(entry.days.len(), 3);
        assert!(entry.days.contains(&Weekday::Mon));
        assert_eq!(entry.stop, StopKind::Now);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ScheduleEntry::from_config(2, &config("x", "25:00", "26:00")),
            Err(ScheduleError::BadTime {
                index: 2,
                value: "25:00".into()
            })
        );
        let mut c = config("x", "10:00", "11:00");
        c.days = vec!["someday".into()];
        assert!(matches!(
            ScheduleEntry::from_config(0, &c),
            Err(ScheduleError::BadDay { .. })
        ));
        assert_eq!(
            ScheduleEntry::from_config(1, &config("x", "10:00", "10:00")),
            Err(ScheduleError::EmptyWindow { index: 1 })
        );
    }

    #[test]
    fn test_overnight_window_belongs_to_start_day() {
        let mut c = config("late", "22:00", "02:00");
        c.days = vec!["fri".into()];
        let entry = ScheduleEntry::from_config(0, &c).unwrap();

        assert!(entry.is_due(at(7, 23, 0))); // Friday night
        assert!(entry.is_due(at(8, 1, 0))); // early Saturday
        assert!(!entry.is_due(at(8, 3, 0)));
        assert!(!entry.is_due(at(8, 23, 0))); // Saturday night
        assert!(!entry.is_due(at(7, 1, 0))); // early Friday belongs to Thursday
    }

    #[test]
    fn test_check_now_recovers_running_window() {
        let mut s = DailyScheduler::from_config(&[config("evening", "18:00", "23:00")]).unwrap();
        let intent = s.check_now(at(3, 19, 0), PlaybackStatus::Idle);
        assert_eq!(
            intent,
            Some(ScheduleIntent::Start(ShowRequest::new("evening", true)))
        );
        assert_eq!(s.active_entry().unwrap().playlist, "evening");
    }

    #[test]
    fn test_tick_starts_on_window_open_only() {
        let mut s = DailyScheduler::from_config(&[config("evening", "18:00", "23:00")]).unwrap();
        assert_eq!(s.check_now(at(3, 17, 0), PlaybackStatus::Idle), None);
        assert_eq!(s.tick(at(3, 17, 59), PlaybackStatus::Idle), None);
        assert!(matches!(
            s.tick(at(3, 18, 0), PlaybackStatus::Idle),
            Some(ScheduleIntent::Start(_))
        ));

        // Stopped by hand inside the window: not restarted.
        assert_eq!(s.tick(at(3, 18, 30), PlaybackStatus::Idle), None);
        assert_eq!(s.tick(at(3, 18, 31), PlaybackStatus::Idle), None);
    }

    #[test]
    fn test_tick_stops_once_when_window_closes() {
        let mut c = config("evening", "18:00", "23:00");
        c.stop = "graceful_after_loop".into();
        let mut s = DailyScheduler::from_config(&[c]).unwrap();
        s.check_now(at(3, 22, 0), PlaybackStatus::Idle);

        assert_eq!(s.tick(at(3, 22, 59), PlaybackStatus::Playing), None);
        assert_eq!(
            s.tick(at(3, 23, 0), PlaybackStatus::Playing),
            Some(ScheduleIntent::Stop(StopKind::GracefulAfterLoop))
        );
        assert_eq!(
            s.tick(at(3, 23, 1), PlaybackStatus::StoppingGracefullyAfterLoop),
            None
        );
        assert_eq!(s.tick(at(3, 23, 2), PlaybackStatus::Idle), None);
        assert!(s.active_entry().is_none());
    }

    #[test]
    fn test_back_to_back_windows_after_graceful_stop() {
        let mut s = DailyScheduler::from_config(&[
            config("early", "18:00", "20:00"),
            config("late", "20:00", "22:00"),
        ])
        .unwrap();
        assert!(s.check_now(at(3, 19, 0), PlaybackStatus::Idle).is_some());

        assert_eq!(
            s.tick(at(3, 20, 0), PlaybackStatus::Playing),
            Some(ScheduleIntent::Stop(StopKind::Graceful))
        );
        assert_eq!(s.tick(at(3, 20, 1), PlaybackStatus::StoppingGracefully), None);
        assert_eq!(
            s.tick(at(3, 20, 2), PlaybackStatus::Idle),
            Some(ScheduleIntent::Start(ShowRequest::new("late", true)))
        );
        assert_eq!(s.active_entry().unwrap().playlist, "late");
        assert_eq!(s.tick(at(3, 20, 3), PlaybackStatus::Playing), None);
    }

    #[test]
    fn test_window_opening_under_manual_show_starts_when_free() {
        let mut s = DailyScheduler::from_config(&[config("evening", "18:00", "23:00")]).unwrap();
        assert_eq!(s.check_now(at(3, 19, 0), PlaybackStatus::Playing), None);
        assert_eq!(s.tick(at(3, 19, 1), PlaybackStatus::Playing), None);
        assert!(matches!(
            s.tick(at(3, 19, 30), PlaybackStatus::Idle),
            Some(ScheduleIntent::Start(_))
        ));
    }

    #[test]
    fn test_priority_is_config_order() {
        let mut s = DailyScheduler::from_config(&[
            config("first", "18:00", "20:00"),
            config("second", "18:00", "21:00"),
        ])
        .unwrap();
        assert_eq!(
            s.check_now(at(3, 18, 30), PlaybackStatus::Idle),
            Some(ScheduleIntent::Start(ShowRequest::new("first", true)))
        );
    }

    #[test]
    fn test_disabled_entries_skipped() {
        let mut c = config("off", "00:00", "23:59");
        c.enabled = false;
        let s = DailyScheduler::from_config(&[c]).unwrap();
        assert!(s.entries().is_empty());
    }

    #[test]
    fn test_leaves_manual_shows_alone() {
        let mut s = DailyScheduler::from_config(&[config("evening", "18:00", "23:00")]).unwrap();
        s.check_now(at(3, 17, 0), PlaybackStatus::Playing);
        assert_eq!(s.tick(at(3, 18, 0), PlaybackStatus::Playing), None);
        assert_eq!(s.tick(at(3, 23, 0), PlaybackStatus::Playing), None);
    }
}
