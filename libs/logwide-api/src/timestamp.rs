use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Timelike, Utc};

use crate::error::ApiError;

/// Parses a record's textual `@timestamp` into a point in time.
///
/// Records hold an `Option<&'static dyn TimestampParser>`: an environment
/// without a parser is expressed as `None` at construction, and every
/// time-based operation then fails with a `Format` error.
pub trait TimestampParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<DateTime<FixedOffset>, ApiError>;
}

/// ISO-8601 date-time parser that keeps the parsed offset.
///
/// Accepts RFC 3339 (`2013-01-02T03:04:05.678Z`, `...+02:00`), offsets without
/// a colon (`+0200`), a space instead of `T`, local times without an offset
/// (read as UTC) and bare dates (midnight UTC).
#[derive(Debug, Default, Clone, Copy)]
pub struct Iso8601Parser;

/// Process-wide parser instance shared by every record.
pub static ISO8601: Iso8601Parser = Iso8601Parser;

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];
const LOCAL_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

impl TimestampParser for Iso8601Parser {
    fn parse(&self, raw: &str) -> Result<DateTime<FixedOffset>, ApiError> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt);
        }
        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
                return Ok(dt);
            }
        }
        for fmt in LOCAL_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Ok(naive.and_utc().fixed_offset());
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc().fixed_offset())
            .ok_or_else(|| ApiError::format(format!("invalid timestamp '{raw}'")))
    }
}

/// The shared parser as a capability reference.
pub fn default_parser() -> &'static dyn TimestampParser {
    &ISO8601
}

/// Current time in the normalized textual form stored in `@timestamp`.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render `dt` with a Joda-style pattern (`yyyy.MM.dd`, `HH:mm:ss.SSS Z`).
///
/// Letters are grouped into runs and rendered as one field each;
/// quoted text (`'T'`) and non-letters are copied literally, `''` is a quote.
/// Unknown letters are copied literally.
pub fn render_pattern(dt: &DateTime<FixedOffset>, pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // `''` outside a quoted run is a literal quote.
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        out.push('\'');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                out.push(chars[i]);
                i += 1;
            }
            continue;
        }
        if !c.is_ascii_alphabetic() {
            out.push(c);
            i += 1;
            continue;
        }
        let mut run = 1;
        while chars.get(i + run) == Some(&c) {
            run += 1;
        }
        render_field(dt, c, run, &mut out);
        i += run;
    }
    out
}

fn render_field(dt: &DateTime<FixedOffset>, letter: char, run: usize, out: &mut String) {
    match letter {
        // One digit of fraction per letter, truncated like Joda.
        'S' => {
            let nanos = format!("{:09}", dt.nanosecond() % 1_000_000_000);
            out.push_str(&nanos[..run.min(9)]);
            for _ in 9..run {
                out.push('0');
            }
        }
        'k' => {
            let hour = match dt.hour() {
                0 => 24,
                h => h,
            };
            push_number(out, hour, run);
        }
        'K' => push_number(out, dt.hour() % 12, run),
        _ => match joda_field(letter, run) {
            Some(spec) => {
                let _ = write!(out, "{}", dt.format(spec));
            }
            None => {
                for _ in 0..run {
                    out.push(letter);
                }
            }
        },
    }
}

fn push_number(out: &mut String, n: u32, width: usize) {
    let _ = write!(out, "{n:0width$}");
}

fn joda_field(letter: char, run: usize) -> Option<&'static str> {
    let spec = match (letter, run) {
        ('y' | 'Y' | 'u', 2) => "%y",
        ('y' | 'Y' | 'u', _) => "%Y",
        ('x', 2) => "%g",
        ('x', _) => "%G",
        ('M', 1) => "%-m",
        ('M', 2) => "%m",
        ('M', 3) => "%b",
        ('M', _) => "%B",
        ('d', 1) => "%-d",
        ('d', _) => "%d",
        ('D', _) => "%j",
        ('H', 1) => "%-H",
        ('H', _) => "%H",
        ('h', 1) => "%-I",
        ('h', _) => "%I",
        ('m', 1) => "%-M",
        ('m', _) => "%M",
        ('s', 1) => "%-S",
        ('s', _) => "%S",
        ('E', 1..=3) => "%a",
        ('E', _) => "%A",
        ('e', _) => "%u",
        ('a', _) => "%p",
        ('w', _) => "%V",
        ('Z', 1) => "%z",
        ('Z', _) => "%:z",
        ('z', _) => "%Z",
        _ => return None,
    };
    Some(spec)
}
