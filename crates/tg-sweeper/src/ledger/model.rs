use chrono::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque identifier of a published item. Its shape is defined by the
/// remote platform, so both numbers and strings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => fmt::Display::fmt(id, f),
            Self::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        Self::Int(id.into())
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_owned())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

/// A single published item awaiting its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "message_id", alias = "id")]
    pub id: RecordId,

    #[serde(
        rename = "sent_at",
        alias = "timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub published_at: DateTime<Utc>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, published_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            published_at,
        }
    }

    /// Age of the record at the moment `now`. It is negative if the record
    /// was published "in the future" due to a clock skew.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.published_at)
    }
}

/// Messages published together at the same moment
#[derive(Deserialize)]
struct RecordBatch {
    message_ids: Vec<RecordId>,

    #[serde(alias = "sent_at", deserialize_with = "deserialize_timestamp")]
    timestamp: DateTime<Utc>,
}

/// Decodes a single entry of the store. Besides plain records, the entries
/// with a `message_ids` list are accepted and expanded into one record per id.
pub(crate) fn records_from_value(
    value: serde_yaml::Value,
) -> Result<Vec<Record>, serde_yaml::Error> {
    let is_batch = value
        .as_mapping()
        .map_or(false, |entry| entry.contains_key("message_ids"));

    if !is_batch {
        return serde_yaml::from_value(value).map(|record| vec![record]);
    }

    let batch: RecordBatch = serde_yaml::from_value(value)?;

    Ok(batch
        .message_ids
        .into_iter()
        .map(|id| Record::new(id, batch.timestamp))
        .collect())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!(
            "expected an ISO-8601 timestamp, but got {raw:?}"
        ))
    })
}

/// Timestamps with an explicit offset are converted to UTC. The ones
/// without any offset are assumed to already be in UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }

    if let Ok(timestamp) = raw.parse::<DateTime<FixedOffset>>() {
        return Some(timestamp.with_timezone(&Utc));
    }

    raw.parse::<NaiveDateTime>()
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[track_caller]
    fn assert_parse(raw: &str, expected: expect_test::Expect) {
        let actual = match parse_timestamp(raw) {
            Some(timestamp) => timestamp.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            None => "None".to_owned(),
        };
        expected.assert_eq(&actual);
    }

    #[test]
    fn timestamp_parsing() {
        use assert_parse as test;

        test(
            "2024-03-01T10:00:00.123456+00:00",
            expect!["2024-03-01T10:00:00.123456Z"],
        );
        test("2024-03-01T10:00:00Z", expect!["2024-03-01T10:00:00Z"]);
        test("2024-03-01T17:00:00+07:00", expect!["2024-03-01T10:00:00Z"]);
        test("2024-03-01 10:00:00+00:00", expect!["2024-03-01T10:00:00Z"]);
        test("2024-03-01T10:00:00.5", expect!["2024-03-01T10:00:00.500Z"]);
        test("yesterday", expect!["None"]);
        test("", expect!["None"]);
    }

    #[test]
    fn record_field_aliases() {
        let records: Vec<Record> = serde_yaml::from_str(
            "
            - message_id: 42
              sent_at: '2024-03-01T10:00:00+00:00'
            - id: abc
              timestamp: '2024-03-01T11:00:00'
              chat_id: -100123
            ",
        )
        .unwrap();

        expect![[r#"
            [
                Record {
                    id: Int(
                        42,
                    ),
                    published_at: 2024-03-01T10:00:00Z,
                },
                Record {
                    id: Str(
                        "abc",
                    ),
                    published_at: 2024-03-01T11:00:00Z,
                },
            ]
        "#]]
        .assert_debug_eq(&records);
    }

    #[test]
    fn age_is_signed() {
        let published_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let record = Record::new(1, published_at);

        assert_eq!(
            record.age(published_at + chrono::Duration::minutes(5)),
            chrono::Duration::minutes(5)
        );
        assert_eq!(
            record.age(published_at - chrono::Duration::minutes(5)),
            -chrono::Duration::minutes(5)
        );
    }
}
