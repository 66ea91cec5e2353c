//! Reminder evaluation library.
//! Lines in a small text grammar are parsed into entries, evaluated against a fixed
//! reference instant, and rendered as a per-file report of pending and overdue items.

pub mod core {
    use chrono::NaiveDate;
    use serde::Serialize;
    use std::{fmt, path::PathBuf};

    /* ------------------------------ Entries ------------------------------ */

    /// One parsed reminder line.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Entry {
        /// 0..=9, 0 is the most urgent.
        pub priority: u8,

        pub date_kind: DateKind,

        /// Optional `HHMM-HHMM` window, stored as minutes of day.
        pub window: Option<TimeWindow>,

        /// Reminder text with continuation markers already joined.
        pub text: String,

        /// Source line as read, kept for diagnostics.
        pub raw_line: String,

        /// Set by the evaluator.
        pub overdue: bool,

        /// Date used for display and ordering; today for weekly entries.
        pub display_date: Option<NaiveDate>,
    }

    impl Entry {
        pub fn new(
            priority: u8,
            date_kind: DateKind,
            window: Option<TimeWindow>,
            text: &str,
            raw_line: &str,
        ) -> Self {
            Self {
                priority,
                date_kind,
                window,
                text: text.trim_end().to_string(),
                raw_line: raw_line.to_string(),
                overdue: false,
                display_date: None,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum DateKind {
        /// `YYYY.MM.DD` where any field may be a wildcard.
        Specific {
            year: DateField,
            month: DateField,
            day: DateField,
        },
        /// Weekday mask, Monday first.
        Weekly {
            days: [bool; 7],
            qualifier: Option<Qualifier>,
        },
    }

    /// A date component that is either concrete or resolved from today at evaluation time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DateField {
        Exact(u32),
        Wild,
    }

    impl DateField {
        pub fn is_wild(self) -> bool {
            matches!(self, DateField::Wild)
        }

        pub fn resolve(self, current: u32) -> u32 {
            match self {
                DateField::Exact(v) => v,
                DateField::Wild => current,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Qualifier {
        /// `%N`: only in ISO weeks divisible by N (1..=53).
        Modulus(u32),
        /// `[N]`: only on the Nth occurrence of the weekday in the month (1..=5).
        Ordinal(u32),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct TimeWindow {
        pub start: u32,
        pub end: u32,
    }

    impl fmt::Display for TimeWindow {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{:02}{:02}-{:02}{:02}",
                self.start / 60,
                self.start % 60,
                self.end / 60,
                self.end % 60
            )
        }
    }

    /* ------------------------------- Groups ------------------------------- */

    /// Named, ordered raw lines from one loaded file.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct Group {
        pub name: String,
        pub lines: Vec<String>,
    }

    impl Group {
        pub fn new(name: impl Into<String>, lines: Vec<String>) -> Self {
            Self {
                name: name.into(),
                lines,
            }
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum ReminderError {
        #[error("unrecognized line in {group}: {line:?}")]
        MalformedLine { group: String, line: String },
        #[error("cannot open data file {}", .path.display())]
        MissingDataFile {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
        #[error("invalid date {year:04}.{month:02}.{day:02} in {line:?}")]
        InvalidDate {
            line: String,
            year: u32,
            month: u32,
            day: u32,
        },
        #[error("lookahead of {0} days is out of range (0..=6)")]
        LookaheadOutOfRange(u32),
        #[error("in {group}")]
        InGroup {
            group: String,
            #[source]
            source: Box<ReminderError>,
        },
    }

    impl ReminderError {
        pub fn in_group(self, group: &str) -> Self {
            ReminderError::InGroup {
                group: group.to_string(),
                source: Box::new(self),
            }
        }
    }
}

pub mod storage {
    use super::core::{Group, ReminderError};
    use std::path::Path;

    /// Produces the ordered groups a report is built from.
    pub trait GroupSource {
        /// Load `root` and everything it includes, primary file first.
        fn load_groups(&self, root: &Path) -> Result<Vec<Group>, ReminderError>;
    }
}

pub mod parser {
    //! Line grammars built on `nom`.
    //!
    //! Two shapes share one skeleton: `P <date-shape>[:HHMM-HHMM] <text>`.
    //! - specific date: `YYYY.MM.DD`, each field may be `????`/`??`
    //! - weekly: `SMTWTFS` mask (Sunday first, `-` for inactive) with optional `%N` or `[N]`

    use crate::core::*;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while_m_n},
        character::complete::{char, digit1, one_of, space1},
        combinator::{all_consuming, map, map_res, opt, rest, value, verify},
        error::VerboseError,
        sequence::{delimited, preceded, separated_pair, terminated, tuple},
    };
    use tracing::trace;

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /* ------------------------ Public entry points ------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Grammar {
        SpecificDate,
        WeeklyRecurring,
    }

    impl Grammar {
        /// Grammars in the order they are tried.
        pub const ALL: [Grammar; 2] = [Grammar::SpecificDate, Grammar::WeeklyRecurring];

        pub fn name(self) -> &'static str {
            match self {
                Grammar::SpecificDate => "specific-date",
                Grammar::WeeklyRecurring => "weekly",
            }
        }

        /// Match the whole line against this grammar.
        pub fn parse(self, line: &str) -> Option<Entry> {
            let shape: fn(&str) -> PResult<'_, DateKind> = match self {
                Grammar::SpecificDate => specific_date,
                Grammar::WeeklyRecurring => weekly_pattern,
            };
            let (_, (priority, date_kind, window, text)) = all_consuming(tuple((
                terminated(priority, space1),
                shape,
                opt(time_window),
                preceded(space1, free_text),
            )))(line)
            .ok()?;
            Some(Entry::new(priority, date_kind, window, text, line))
        }
    }

    /// Classify and parse one logical line; `None` means no grammar matched.
    pub fn parse_line(line: &str) -> Option<Entry> {
        Grammar::ALL.iter().find_map(|g| {
            let entry = g.parse(line)?;
            trace!(grammar = g.name(), line, "matched");
            Some(entry)
        })
    }

    /* ------------------------------- Pieces ------------------------------- */

    fn priority(i: &str) -> PResult<'_, u8> {
        map(one_of("0123456789"), |c: char| c as u8 - b'0')(i)
    }

    fn free_text(i: &str) -> PResult<'_, &str> {
        verify(rest, |s: &str| !s.trim().is_empty())(i)
    }

    fn digits(n: usize) -> impl Fn(&str) -> PResult<'_, &str> {
        move |i: &str| take_while_m_n(n, n, |c: char| c.is_ascii_digit())(i)
    }

    fn number(n: usize) -> impl Fn(&str) -> PResult<'_, u32> {
        move |i: &str| map_res(digits(n), |s: &str| s.parse::<u32>())(i)
    }

    /* ---------------------------- Specific date ---------------------------- */

    fn specific_date(i: &str) -> PResult<'_, DateKind> {
        map(
            tuple((year_field, char('.'), month_field, char('.'), day_field)),
            |(year, _, month, _, day)| DateKind::Specific { year, month, day },
        )(i)
    }

    fn year_field(i: &str) -> PResult<'_, DateField> {
        alt((
            value(DateField::Wild, tag("????")),
            map(
                verify(number(4), |y: &u32| (2000..=2199).contains(y)),
                DateField::Exact,
            ),
        ))(i)
    }

    fn month_field(i: &str) -> PResult<'_, DateField> {
        bounded_field(1, 12)(i)
    }

    fn day_field(i: &str) -> PResult<'_, DateField> {
        bounded_field(1, 31)(i)
    }

    fn bounded_field(lo: u32, hi: u32) -> impl Fn(&str) -> PResult<'_, DateField> {
        move |i: &str| {
            alt((
                value(DateField::Wild, tag("??")),
                map(
                    verify(number(2), |v: &u32| (lo..=hi).contains(v)),
                    DateField::Exact,
                ),
            ))(i)
        }
    }

    /* ------------------------------- Weekly ------------------------------- */

    fn weekly_pattern(i: &str) -> PResult<'_, DateKind> {
        map(tuple((day_mask, opt(qualifier))), |(days, qualifier)| {
            DateKind::Weekly { days, qualifier }
        })(i)
    }

    fn day_mask(i: &str) -> PResult<'_, [bool; 7]> {
        let (i, (sun, mon, tue, wed, thu, fri, sat)) = tuple((
            day_column('S'),
            day_column('M'),
            day_column('T'),
            day_column('W'),
            day_column('T'),
            day_column('F'),
            day_column('S'),
        ))(i)?;
        Ok((i, [mon, tue, wed, thu, fri, sat, sun]))
    }

    fn day_column(letter: char) -> impl Fn(&str) -> PResult<'_, bool> {
        move |i: &str| alt((value(true, char(letter)), value(false, char('-'))))(i)
    }

    fn qualifier(i: &str) -> PResult<'_, Qualifier> {
        alt((
            map(
                preceded(
                    char('%'),
                    verify(
                        map_res(digit1, |s: &str| s.parse::<u32>()),
                        |n: &u32| (1..=53).contains(n),
                    ),
                ),
                Qualifier::Modulus,
            ),
            map(
                delimited(
                    char('['),
                    verify(number(1), |n: &u32| (1..=5).contains(n)),
                    char(']'),
                ),
                Qualifier::Ordinal,
            ),
        ))(i)
    }

    /* ----------------------------- Time window ----------------------------- */

    fn time_window(i: &str) -> PResult<'_, TimeWindow> {
        map(
            preceded(char(':'), separated_pair(clock_time, char('-'), clock_time)),
            |(start, end)| TimeWindow { start, end },
        )(i)
    }

    fn clock_time(i: &str) -> PResult<'_, u32> {
        map(
            verify(tuple((number(2), number(2))), |(h, m): &(u32, u32)| {
                *h < 24 && *m < 60
            }),
            |(h, m)| h * 60 + m,
        )(i)
    }

}

pub mod evaluate {
    //! Decides whether an entry is pending or overdue as of a [`Reference`] instant.

    use crate::core::*;
    use chrono::{Datelike, Days, Local, NaiveDate, NaiveDateTime, Timelike};
    use tracing::debug;

    /// Immutable snapshot of "now", taken once per run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Reference {
        pub today: NaiveDate,
        pub minute_of_day: u32,
        /// ISO 8601 week number of `today`.
        pub iso_week: u32,
    }

    impl Reference {
        pub fn at(now: NaiveDateTime) -> Self {
            let today = now.date();
            Self {
                today,
                minute_of_day: now.hour() * 60 + now.minute(),
                iso_week: today.iso_week().week(),
            }
        }

        /// Capture the local wall clock.
        pub fn now() -> Self {
            Self::at(Local::now().naive_local())
        }

        pub fn window_passed(&self, window: &TimeWindow) -> bool {
            self.minute_of_day > window.end
        }
    }

    /// Days past today that still count as pending.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lookahead(u32);

    impl Lookahead {
        /// Modulus and ordinal recurrences are only well defined within one week.
        pub const MAX: u32 = 6;
        pub const DEFAULT: u32 = 3;

        pub fn days(self) -> u32 {
            self.0
        }
    }

    impl Default for Lookahead {
        fn default() -> Self {
            Lookahead(Self::DEFAULT)
        }
    }

    impl TryFrom<u32> for Lookahead {
        type Error = ReminderError;

        fn try_from(days: u32) -> Result<Self, Self::Error> {
            if days <= Self::MAX {
                Ok(Lookahead(days))
            } else {
                Err(ReminderError::LookaheadOutOfRange(days))
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Verdict {
        pub keep: bool,
        pub overdue: bool,
        pub display_date: NaiveDate,
    }

    impl Verdict {
        fn dropped(today: NaiveDate) -> Self {
            Verdict {
                keep: false,
                overdue: false,
                display_date: today,
            }
        }
    }

    impl Entry {
        pub fn apply(&mut self, verdict: &Verdict) {
            self.overdue = verdict.overdue;
            self.display_date = Some(verdict.display_date);
        }
    }

    pub fn evaluate(
        entry: &Entry,
        reference: &Reference,
        lookahead: Lookahead,
    ) -> Result<Verdict, ReminderError> {
        match entry.date_kind {
            DateKind::Specific { year, month, day } => {
                evaluate_specific(entry, [year, month, day], reference, lookahead)
            }
            DateKind::Weekly { days, qualifier } => Ok(evaluate_weekly(
                entry, &days, qualifier, reference, lookahead,
            )),
        }
    }

    fn evaluate_specific(
        entry: &Entry,
        [year, month, day]: [DateField; 3],
        reference: &Reference,
        lookahead: Lookahead,
    ) -> Result<Verdict, ReminderError> {
        let today = reference.today;
        let wild = year.is_wild() || month.is_wild() || day.is_wild();
        let (y, m, d) = (
            year.resolve(today.year() as u32),
            month.resolve(today.month()),
            day.resolve(today.day()),
        );

        let Some(date) = NaiveDate::from_ymd_opt(y as i32, m, d) else {
            if wild && occurs_in_some_month(month, day) {
                debug!(line = %entry.raw_line, "wildcard date does not exist this month");
                return Ok(Verdict::dropped(today));
            }
            return Err(ReminderError::InvalidDate {
                line: entry.raw_line.clone(),
                year: y,
                month: m,
                day: d,
            });
        };

        let overdue = !wild
            && (date < today
                || (date == today && entry.window.is_some_and(|w| reference.window_passed(&w))));
        let horizon = today + Days::new(lookahead.days().into());
        let keep = overdue || (today..=horizon).contains(&date);

        Ok(Verdict {
            keep,
            overdue,
            display_date: date,
        })
    }

    /// Whether the fixed month/day parts name a real day for some resolution of the
    /// wildcards. 2000 is a leap year, so `02.29` counts.
    fn occurs_in_some_month(month: DateField, day: DateField) -> bool {
        let months = match month {
            DateField::Exact(m) => m..=m,
            DateField::Wild => 1..=12,
        };
        let day = day.resolve(1);
        months
            .into_iter()
            .any(|m| NaiveDate::from_ymd_opt(2000, m, day).is_some())
    }

    fn evaluate_weekly(
        entry: &Entry,
        days: &[bool; 7],
        qualifier: Option<Qualifier>,
        reference: &Reference,
        lookahead: Lookahead,
    ) -> Verdict {
        let today = reference.today;
        if entry.window.is_some_and(|w| reference.window_passed(&w)) {
            debug!(line = %entry.raw_line, "window already closed today");
            return Verdict::dropped(today);
        }

        let keep = (0..=lookahead.days()).any(|offset| {
            let day = today + Days::new(offset.into());
            if !days[day.weekday().num_days_from_monday() as usize] {
                return false;
            }
            match qualifier {
                None => true,
                Some(Qualifier::Modulus(n)) => reference.iso_week.checked_rem(n) == Some(0),
                Some(Qualifier::Ordinal(n)) => offset == 0 && nth_week_of_month(n, today.day()),
            }
        });

        Verdict {
            keep,
            overdue: false,
            display_date: today,
        }
    }

    /// Whether `day_of_month` is in the Nth seven-day block of the month.
    /// Ordinal 0 matches nothing.
    fn nth_week_of_month(n: u32, day_of_month: u32) -> bool {
        let Some(first) = n.checked_sub(1).map(|block| 1 + block * 7) else {
            return false;
        };
        (first..=first + 6).contains(&day_of_month)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::parser::parse_line;
        use chrono::NaiveTime;

        fn reference(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> Reference {
            let date = NaiveDate::from_ymd_opt(y, m, d).unwrap();
            Reference::at(date.and_time(NaiveTime::from_hms_opt(hh, mm, 0).unwrap()))
        }

        fn verdict(line: &str, r: &Reference, days: u32) -> Verdict {
            let entry = parse_line(line).expect("parse");
            evaluate(&entry, r, Lookahead::try_from(days).unwrap()).expect("evaluate")
        }

        #[test]
        fn reference_captures_iso_week_and_minutes() {
            let r = reference(2020, 1, 7, 7, 30);
            assert_eq!(r.iso_week, 2);
            assert_eq!(r.minute_of_day, 450);
            assert_eq!(reference(2021, 1, 1, 0, 0).iso_week, 53);
        }

        #[test]
        fn lookahead_is_capped_at_one_week() {
            assert!(Lookahead::try_from(6).is_ok());
            assert!(matches!(
                Lookahead::try_from(7),
                Err(ReminderError::LookaheadOutOfRange(7))
            ));
            assert_eq!(Lookahead::default().days(), 3);
        }

        #[test]
        fn past_concrete_date_is_overdue() {
            let r = reference(2020, 1, 2, 12, 0);
            let v = verdict("1 2020.01.01 Release remindo", &r, 3);
            assert!(v.keep);
            assert!(v.overdue);
            assert_eq!(v.display_date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());

            let v = verdict("1 2019.06.30 Ancient", &r, 0);
            assert!(v.keep && v.overdue);
        }

        #[test]
        fn today_is_overdue_only_once_window_closes() {
            let line = "2 2020.01.02:0800-0900 Standup";
            let before = verdict(line, &reference(2020, 1, 2, 9, 0), 3);
            assert!(before.keep);
            assert!(!before.overdue);

            let after = verdict(line, &reference(2020, 1, 2, 9, 1), 3);
            assert!(after.keep);
            assert!(after.overdue);

            let untimed = verdict("2 2020.01.02 All day", &reference(2020, 1, 2, 23, 59), 3);
            assert!(untimed.keep && !untimed.overdue);
        }

        #[test]
        fn lookahead_boundary_is_inclusive() {
            let r = reference(2020, 1, 2, 12, 0);
            assert!(verdict("1 2020.01.05 Edge", &r, 3).keep);
            assert!(!verdict("1 2020.01.06 Beyond", &r, 3).keep);
            assert!(verdict("1 2020.01.02 Today", &r, 0).keep);
            assert!(!verdict("1 2020.01.03 Tomorrow", &r, 0).keep);
        }

        #[test]
        fn wildcards_are_never_overdue() {
            // Resolves to 2020.01.01, in the past, but still not overdue.
            let r = reference(2020, 3, 2, 12, 0);
            let v = verdict("1 ????.01.01 New year", &r, 3);
            assert!(!v.overdue);
            assert!(!v.keep);

            for d in 1..=31 {
                let r = reference(2020, 1, d, 23, 59);
                for line in [
                    "1 ????.??.??:0000-0001 Always",
                    "1 2020.01.??:0000-0001 This month",
                    "1 ????.01.05 Fifth",
                ] {
                    assert!(!verdict(line, &r, 6).overdue, "{} on day {}", line, d);
                }
            }
        }

        #[test]
        fn wildcards_resolve_to_today() {
            let r = reference(2020, 5, 10, 12, 0);
            let v = verdict("1 ????.??.12 Twelfth", &r, 3);
            assert!(v.keep);
            assert_eq!(v.display_date, NaiveDate::from_ymd_opt(2020, 5, 12).unwrap());

            let v = verdict("1 ????.??.14 Fourteenth", &r, 3);
            assert!(!v.keep);
        }

        #[test]
        fn nonexistent_wildcard_date_is_skipped() {
            let r = reference(2020, 4, 30, 12, 0);
            let v = verdict("1 ????.??.31 Month end", &r, 3);
            assert!(!v.keep);
        }

        #[test]
        fn nonexistent_concrete_date_is_an_error() {
            let r = reference(2020, 1, 2, 12, 0);
            let entry = parse_line("1 2021.02.30 Never").unwrap();
            let err = evaluate(&entry, &r, Lookahead::default()).unwrap_err();
            assert!(matches!(
                err,
                ReminderError::InvalidDate {
                    year: 2021,
                    month: 2,
                    day: 30,
                    ..
                }
            ));
        }

        #[test]
        fn impossible_wildcard_dates_are_errors() {
            let r = reference(2020, 1, 2, 12, 0);
            for line in ["1 ????.02.30 Never", "1 ????.04.31 Never", "1 2020.02.31 Never"] {
                let entry = parse_line(line).expect("parse");
                let err = evaluate(&entry, &r, Lookahead::default()).unwrap_err();
                assert!(
                    matches!(err, ReminderError::InvalidDate { .. }),
                    "{}: {:?}",
                    line,
                    err
                );
            }

            // Built directly, bypassing the grammar's range checks.
            let entry = Entry::new(
                1,
                DateKind::Specific {
                    year: DateField::Wild,
                    month: DateField::Exact(13),
                    day: DateField::Exact(1),
                },
                None,
                "Month thirteen",
                "1 ????.13.01 Month thirteen",
            );
            assert!(matches!(
                evaluate(&entry, &r, Lookahead::default()),
                Err(ReminderError::InvalidDate { month: 13, .. })
            ));
        }

        #[test]
        fn leap_day_wildcard_is_skipped_in_common_years() {
            let v = verdict("1 ????.02.29 Leap day", &reference(2021, 2, 27, 12, 0), 3);
            assert!(!v.keep);
            assert!(!v.overdue);

            let v = verdict("1 ????.02.29 Leap day", &reference(2020, 2, 27, 12, 0), 3);
            assert!(v.keep);

            let v = verdict("1 2021.??.31 Month end", &reference(2021, 4, 30, 12, 0), 3);
            assert!(!v.keep);
        }

        #[test]
        fn zero_qualifiers_never_match() {
            let r = reference(2020, 1, 2, 12, 0);
            for qualifier in [Qualifier::Modulus(0), Qualifier::Ordinal(0)] {
                let entry = Entry::new(
                    1,
                    DateKind::Weekly {
                        days: [true; 7],
                        qualifier: Some(qualifier),
                    },
                    None,
                    "Zero",
                    "1 SMTWTFS Zero",
                );
                let v = evaluate(&entry, &r, Lookahead::default()).expect("evaluate");
                assert!(!v.keep, "{:?}", qualifier);
            }
        }

        #[test]
        fn weekly_matches_within_window_and_wraps() {
            // 2020-01-02 is a Thursday.
            let r = reference(2020, 1, 2, 12, 0);
            assert!(verdict("1 ----T-- Thursday", &r, 0).keep);
            assert!(!verdict("1 -M----- Monday", &r, 3).keep);
            assert!(verdict("1 -M----- Monday", &r, 4).keep);
            assert!(verdict("1 S------ Sunday", &r, 3).keep);

            let v = verdict("1 S------ Sunday", &r, 3);
            assert_eq!(v.display_date, r.today);
        }

        #[test]
        fn weekly_is_never_overdue() {
            let r = reference(2020, 1, 2, 23, 0);
            for line in [
                "1 SMTWTFS Daily",
                "1 SMTWTFS:0800-0900 Closed window",
                "1 SMTWTFS%3 Every third week",
                "1 SMTWTFS[1] First week",
            ] {
                assert!(!verdict(line, &r, 6).overdue, "{}", line);
            }
        }

        #[test]
        fn closed_window_drops_weekly_for_today() {
            let line = "3 SMTWTFS:0800-0900 Check status";
            assert!(verdict(line, &reference(2020, 1, 2, 8, 30), 3).keep);
            assert!(!verdict(line, &reference(2020, 1, 2, 9, 30), 3).keep);
        }

        #[test]
        fn modulus_follows_iso_week_parity() {
            let line = "3 --T----%2:0800-0900 Check status";
            // Tuesday 2020-01-07 is in week 2, Tuesday 2020-01-14 in week 3.
            let even = verdict(line, &reference(2020, 1, 7, 7, 0), 3);
            assert!(even.keep);
            assert!(!even.overdue);
            assert!(!verdict(line, &reference(2020, 1, 14, 7, 0), 3).keep);
        }

        #[test]
        fn modulus_uses_todays_week_across_the_scan() {
            // Sunday 2020-01-12 is week 2; the Tuesday reached by lookahead is week 3.
            let r = reference(2020, 1, 12, 12, 0);
            assert!(verdict("1 --T----%2 Even weeks", &r, 2).keep);
            assert!(!verdict("1 --T----%3 Third weeks", &r, 2).keep);
        }

        #[test]
        fn ordinal_only_matches_today() {
            let line = "4 -M-----[2] Second Monday";
            // Mondays in January 2020: 6, 13, 20.
            assert!(verdict(line, &reference(2020, 1, 13, 12, 0), 0).keep);
            assert!(!verdict(line, &reference(2020, 1, 6, 12, 0), 6).keep);
            assert!(!verdict(line, &reference(2020, 1, 20, 12, 0), 6).keep);
            // Sunday the 12th: the 13th is in range but ordinals ignore lookahead.
            assert!(!verdict(line, &reference(2020, 1, 12, 12, 0), 3).keep);
            // Tuesday the 14th is in the second block but not a Monday.
            assert!(!verdict(line, &reference(2020, 1, 14, 12, 0), 6).keep);
        }

        #[test]
        fn nth_week_blocks() {
            assert!(nth_week_of_month(1, 1));
            assert!(nth_week_of_month(1, 7));
            assert!(!nth_week_of_month(1, 8));
            assert!(nth_week_of_month(5, 29));
            assert!(nth_week_of_month(5, 31));
            assert!(!nth_week_of_month(0, 1));
        }
    }
}

pub mod render {
    //! Fixed-column text layout for pending entries.

    use crate::core::Entry;
    use chrono::NaiveDate;

    /// Column where reminder text starts: marker, priority, date and window fields.
    pub const TEXT_COLUMN: usize = 24;
    pub const MIN_TEXT_WIDTH: usize = 20;
    pub const DEFAULT_WIDTH: usize = 80;

    /// Overdue first, then date, priority and window start; untimed entries last.
    pub fn sort_key(entry: &Entry) -> (bool, Option<NaiveDate>, u8, u32) {
        (
            !entry.overdue,
            entry.display_date,
            entry.priority,
            entry.window.map_or(u32::MAX, |w| w.start),
        )
    }

    /// Stable sort; equal keys keep input order.
    pub fn sort_entries(entries: &mut [Entry]) {
        entries.sort_by_key(sort_key);
    }

    pub fn render_entry(entry: &Entry, width: usize) -> Vec<String> {
        let marker = if entry.overdue { '*' } else { ' ' };
        let date = entry
            .display_date
            .map(|d| d.format("%Y.%m.%d").to_string())
            .unwrap_or_default();
        let window = entry.window.map(|w| w.to_string()).unwrap_or_default();
        let head = format!("{marker}{} {date:<10} {window:>9} ", entry.priority);

        let text_width = width.saturating_sub(TEXT_COLUMN).max(MIN_TEXT_WIDTH);
        let indent = " ".repeat(TEXT_COLUMN);
        textwrap::wrap(&entry.text, text_width)
            .into_iter()
            .enumerate()
            .map(|(idx, line)| {
                if idx == 0 {
                    format!("{head}{line}")
                } else {
                    format!("{indent}{line}")
                }
            })
            .collect()
    }

    pub fn limit_marker(limit: usize) -> String {
        format!("{:width$}limit exceeded ({limit})", "", width = TEXT_COLUMN)
    }

    /// Render already-sorted entries, printing at most `limit` of them.
    pub fn render_group(entries: &[Entry], width: usize, limit: Option<usize>) -> Vec<String> {
        let shown = limit.map_or(entries.len(), |l| l.min(entries.len()));
        let mut lines: Vec<String> = entries[..shown]
            .iter()
            .flat_map(|e| render_entry(e, width))
            .collect();
        if shown < entries.len() {
            if let Some(limit) = limit {
                lines.push(limit_marker(limit));
            }
        }
        lines
    }

}

pub mod report {
    //! Per-group collection: parse, evaluate, sort and render.

    use crate::core::*;
    use crate::evaluate::{Lookahead, Reference, evaluate};
    use crate::parser::parse_line;
    use crate::render::{DEFAULT_WIDTH, render_group, sort_entries};
    use serde::Serialize;
    use tracing::{debug, warn};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReportOptions {
        pub lookahead: Lookahead,
        /// Maximum entries printed per group; `None` prints everything.
        pub limit: Option<usize>,
        /// Total output width used for wrapping.
        pub width: usize,
    }

    impl Default for ReportOptions {
        fn default() -> Self {
            Self {
                lookahead: Lookahead::default(),
                limit: None,
                width: DEFAULT_WIDTH,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct RenderedGroup {
        pub name: String,
        /// Formatted output lines, including the limit marker if any.
        pub lines: Vec<String>,
        /// Every pending entry in display order, before the limit is applied.
        pub entries: Vec<Entry>,
    }

    #[derive(Debug, Default)]
    pub struct Report {
        pub groups: Vec<RenderedGroup>,
        /// Non-fatal problems, currently unrecognized lines.
        pub warnings: Vec<ReminderError>,
    }

    /// Build the report for `groups` in order; groups are never merged.
    pub fn produce_report(
        groups: &[Group],
        reference: &Reference,
        options: &ReportOptions,
    ) -> Result<Report, ReminderError> {
        let mut report = Report::default();
        for group in groups {
            let entries =
                collect_pending(group, reference, options.lookahead, &mut report.warnings)?;
            debug!(group = %group.name, pending = entries.len(), "collected group");
            let lines = render_group(&entries, options.width, options.limit);
            report.groups.push(RenderedGroup {
                name: group.name.clone(),
                lines,
                entries,
            });
        }
        Ok(report)
    }

    /// Parse and evaluate every line of `group`, returning pending entries sorted.
    pub fn collect_pending(
        group: &Group,
        reference: &Reference,
        lookahead: Lookahead,
        warnings: &mut Vec<ReminderError>,
    ) -> Result<Vec<Entry>, ReminderError> {
        let mut pending = Vec::new();
        for line in &group.lines {
            let Some(mut entry) = parse_line(line) else {
                warn!(group = %group.name, line = %line, "unrecognized line");
                warnings.push(ReminderError::MalformedLine {
                    group: group.name.clone(),
                    line: line.clone(),
                });
                continue;
            };
            let verdict =
                evaluate(&entry, reference, lookahead).map_err(|e| e.in_group(&group.name))?;
            if verdict.keep {
                entry.apply(&verdict);
                pending.push(entry);
            }
        }
        sort_entries(&mut pending);
        Ok(pending)
    }

}

pub mod loader {
    //! Reads reminder files from disk.
    //!
    //! Comments (`#`) and blank lines are dropped, lines ending in ` \` continue on the
    //! next physical line, and `include <path>` pulls in another file as its own group.

    use crate::core::{Group, ReminderError};
    use crate::storage::GroupSource;
    use directories::BaseDirs;
    use indexmap::IndexMap;
    use std::{
        collections::HashSet,
        fs,
        path::{Path, PathBuf},
    };
    use tracing::{debug, warn};

    pub const INCLUDE_DIRECTIVE: &str = "include";

    /// `~/.remindo/remindo.txt`, if a home directory can be determined.
    pub fn default_data_file() -> Option<PathBuf> {
        BaseDirs::new().map(|d| d.home_dir().join(".remindo").join("remindo.txt"))
    }

    /// Filesystem-backed source following `include` directives depth-first.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FsGroupSource;

    impl GroupSource for FsGroupSource {
        fn load_groups(&self, root: &Path) -> Result<Vec<Group>, ReminderError> {
            load_groups(root)
        }
    }

    pub fn load_groups(root: &Path) -> Result<Vec<Group>, ReminderError> {
        let text = fs::read_to_string(root).map_err(|source| ReminderError::MissingDataFile {
            path: root.to_path_buf(),
            source,
        })?;
        let mut walk = Walk {
            base: root.parent().map(Path::to_path_buf).unwrap_or_default(),
            visited: HashSet::new(),
            groups: IndexMap::new(),
        };
        walk.visit(root, &text);
        Ok(walk
            .groups
            .into_iter()
            .map(|(name, lines)| Group { name, lines })
            .collect())
    }

    /// Add `lines` under `name`; an existing group keeps its position and gets them appended.
    pub fn merge_group(
        groups: &mut IndexMap<String, Vec<String>>,
        name: String,
        lines: Vec<String>,
    ) {
        groups.entry(name).or_default().extend(lines);
    }

    struct Walk {
        base: PathBuf,
        visited: HashSet<PathBuf>,
        groups: IndexMap<String, Vec<String>>,
    }

    impl Walk {
        fn visit(&mut self, path: &Path, text: &str) {
            let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            if !self.visited.insert(key) {
                debug!(path = %path.display(), "already loaded, skipping");
                return;
            }

            let mut lines = Vec::new();
            let mut includes = Vec::new();
            for line in logical_lines(text) {
                match include_target(&line) {
                    Some(target) => includes.push(resolve_include(path, target)),
                    None => lines.push(line),
                }
            }
            debug!(path = %path.display(), lines = lines.len(), "loaded");
            let name = self.group_name(path);
            merge_group(&mut self.groups, name, lines);

            for include in includes {
                match fs::read_to_string(&include) {
                    Ok(text) => self.visit(&include, &text),
                    Err(err) => {
                        warn!(path = %include.display(), error = %err, "skipping missing include")
                    }
                }
            }
        }

        fn group_name(&self, path: &Path) -> String {
            path.strip_prefix(&self.base)
                .unwrap_or(path)
                .display()
                .to_string()
        }
    }

    /// Join continuation lines and drop comments and blank lines.
    pub fn logical_lines(text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut pending: Option<String> = None;

        for physical in text.lines() {
            let physical = physical.trim_end();
            let current = match pending.take() {
                Some(mut acc) => {
                    acc.push_str(physical.trim_start());
                    acc
                }
                None => {
                    if is_blank_or_comment(physical) {
                        continue;
                    }
                    physical.to_string()
                }
            };
            match strip_continuation(&current) {
                Some(head) => pending = Some(head.to_string()),
                None => out.push(current.trim_end().to_string()),
            }
        }
        if let Some(acc) = pending {
            let acc = acc.trim_end();
            if !acc.is_empty() {
                out.push(acc.to_string());
            }
        }
        out
    }

    fn is_blank_or_comment(line: &str) -> bool {
        let t = line.trim_start();
        t.is_empty() || t.starts_with('#')
    }

    /// `"text \"` -> `"text "`; needs exactly one space before the backslash.
    fn strip_continuation(line: &str) -> Option<&str> {
        let head = line.strip_suffix(" \\")?;
        if head.is_empty() || head.ends_with(char::is_whitespace) {
            return None;
        }
        Some(&line[..line.len() - 1])
    }

    fn include_target(line: &str) -> Option<&str> {
        let rest = line.strip_prefix(INCLUDE_DIRECTIVE)?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        Some(rest.trim()).filter(|t| !t.is_empty())
    }

    fn resolve_include(including: &Path, target: &str) -> PathBuf {
        if let Some(rest) = target.strip_prefix("~/") {
            if let Some(dirs) = BaseDirs::new() {
                return dirs.home_dir().join(rest);
            }
        }
        let target = Path::new(target);
        if target.is_absolute() {
            return target.to_path_buf();
        }
        including
            .parent()
            .map(|dir| dir.join(target))
            .unwrap_or_else(|| target.to_path_buf())
    }

}

pub use evaluate::{Lookahead, Reference, Verdict, evaluate};
pub use loader::{FsGroupSource, load_groups};
pub use parser::parse_line;
pub use report::{RenderedGroup, Report, ReportOptions, produce_report};
