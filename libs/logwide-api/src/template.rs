//! `%{...}` template expansion against an [`EventRecord`].
//!
//! Token forms:
//! - `%{+%s}` → unix epoch seconds of `@timestamp`
//! - `%{+PATTERN}` → `@timestamp` rendered with a Joda-style pattern
//! - `%{name}` / `%{a.b.c}` → record value, metadata first, then a dotted
//!   walk through nested mappings
//!
//! Unresolved names are left in place verbatim. Only the time forms can
//! fail, and only when the record has no timestamp parser or an unparseable
//! `@timestamp`.

use std::borrow::Cow;

use crate::error::ApiError;
use crate::record::EventRecord;
use crate::timestamp;
use crate::value::Value;

const OPEN: &str = "%{";
const EPOCH_SECONDS: &str = "+%s";

impl EventRecord {
    /// Expand every `%{...}` token in `template`.
    ///
    /// A template without `%` is returned borrowed, without scanning.
    pub fn format<'a>(&self, template: &'a str) -> Result<Cow<'a, str>, ApiError> {
        if !template.contains('%') {
            return Ok(Cow::Borrowed(template));
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find(OPEN) {
            let body = &rest[start + OPEN.len()..];
            match body.find('}') {
                // `%{}` is not a token.
                Some(0) => {
                    out.push_str(&rest[..start + OPEN.len()]);
                    rest = body;
                }
                Some(end) => {
                    out.push_str(&rest[..start]);
                    let token = &rest[start..start + OPEN.len() + end + 1];
                    self.expand_token(&body[..end], token, &mut out)?;
                    rest = &body[end + 1..];
                }
                None => break,
            }
        }
        out.push_str(rest);
        Ok(Cow::Owned(out))
    }

    fn expand_token(&self, key: &str, token: &str, out: &mut String) -> Result<(), ApiError> {
        if key == EPOCH_SECONDS {
            let ts = self.token_time(token)?;
            out.push_str(&ts.timestamp().to_string());
            return Ok(());
        }
        if let Some(pattern) = key.strip_prefix('+') {
            let ts = self.token_time(token)?;
            out.push_str(&timestamp::render_pattern(&ts, pattern));
            return Ok(());
        }
        match self.resolve(key) {
            Some(value) if !value.is_null() => value.render_into(out),
            _ => out.push_str(token),
        }
        Ok(())
    }

    fn token_time(&self, token: &str) -> Result<chrono::DateTime<chrono::FixedOffset>, ApiError> {
        self.parsed_timestamp().map_err(|e| e.with_context(format!("template token {token}")))
    }

    /// Look up `path`: first as a whole key, then as a dotted walk through
    /// nested mappings. `None` as soon as a segment is missing or the current
    /// value is not a mapping.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        self.get(path).or_else(|| {
            let mut segments = path.split('.');
            let mut current = self.get(segments.next()?)?;
            for segment in segments {
                current = current.as_mapping()?.get(segment)?;
            }
            Some(current)
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::error::ErrorKind;
    use crate::value::Fields;

    fn record() -> EventRecord {
        let mut record = EventRecord::from_json(
            r#"{
                "@timestamp": "2013-01-02T03:04:05.678Z",
                "@type": "apache",
                "@fields": {
                    "host": "web1",
                    "codes": ["200", "404"],
                    "geo": {"city": "Oslo", "loc": {"lat": 59.9}},
                    "count": 3,
                    "ok": false
                }
            }"#,
        )
        .unwrap();
        record.set_tags(["web"]);
        record
    }

    #[test]
    fn expands_metadata_and_fields() {
        let out = record().format("%{@type}-%{host}").unwrap();
        assert_eq!(out, "apache-web1");
    }

    #[test]
    fn unresolved_tokens_stay_literal() {
        let r = record();
        assert_eq!(r.format("%{missing}").unwrap(), "%{missing}");
        assert_eq!(r.format("a %{geo.nope} b").unwrap(), "a %{geo.nope} b");
        assert_eq!(r.format("%{host.deeper}").unwrap(), "%{host.deeper}");
        assert_eq!(r.format("%{@type").unwrap(), "%{@type");
        assert_eq!(r.format("%{}x").unwrap(), "%{}x");
    }

    #[test]
    fn null_values_count_as_unresolved() {
        // @type defaults to null.
        let r = EventRecord::new();
        assert_eq!(r.format("%{@type}").unwrap(), "%{@type}");
    }

    #[test]
    fn renders_each_value_shape() {
        let r = record();
        assert_eq!(r.format("%{codes}").unwrap(), "200,404");
        assert_eq!(r.format("%{geo}").unwrap(), r#"{"city":"Oslo","loc":{"lat":59.9}}"#);
        assert_eq!(r.format("%{count}/%{ok}").unwrap(), "3/false");
        assert_eq!(r.format("%{@tags}").unwrap(), "web");
    }

    #[test]
    fn dotted_paths_walk_nested_mappings() {
        let r = record();
        assert_eq!(r.format("%{geo.city}").unwrap(), "Oslo");
        assert_eq!(r.format("%{geo.loc.lat}").unwrap(), "59.9");
    }

    #[test]
    fn whole_key_wins_over_dotted_walk() {
        let mut r = record();
        r.set("geo.city", "literal");
        assert_eq!(r.format("%{geo.city}").unwrap(), "literal");
    }

    #[test]
    fn time_tokens() {
        let r = record();
        assert_eq!(r.format("%{+%s}").unwrap(), "1357095845");
        assert_eq!(r.format("logstash-%{+YYYY.MM.dd}").unwrap(), "logstash-2013.01.02");
        assert_eq!(r.format("%{host}@%{+HH:mm}").unwrap(), "web1@03:04");
    }

    #[test]
    fn time_tokens_need_a_parser() {
        let r = record().with_parser(None);
        let err = r.format("%{+%s}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
        let err = r.format("%{+yyyy}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Format);
        // Field tokens still work without one.
        assert_eq!(r.format("%{host}").unwrap(), "web1");
    }

    #[test]
    fn unparseable_timestamp_fails_time_tokens() {
        let mut r = record();
        r.set_timestamp("not a time");
        assert_eq!(r.format("%{+%s}").unwrap_err().kind, ErrorKind::Format);
    }

    #[test]
    fn plain_templates_are_borrowed() {
        let r = record();
        assert!(matches!(r.format("logs_by_host").unwrap(), Cow::Borrowed(_)));
    }

    proptest! {
        #[test]
        fn templates_without_markers_are_unchanged(template in "[^%]*") {
            let r = EventRecord::from_fields(Fields::new()).unwrap();
            let out = r.format(&template).unwrap();
            prop_assert_eq!(out.as_ref(), template.as_str());
        }
    }
}
