//! Telegram side of the sweeper

mod deleter;

use serde::{Deserialize, Deserializer};
use std::time::Duration;
use teloxide::types::{ChatId, Recipient};

pub(crate) use deleter::TgDeleter;

pub(crate) type Bot = teloxide::Bot;

#[derive(Deserialize)]
pub(crate) struct Config {
    pub(crate) token: String,

    /// Chat where the messages were published. Either a numeric chat ID
    /// or a `@username` of a public channel.
    #[serde(deserialize_with = "deserialize_recipient")]
    pub(crate) chat: Recipient,

    /// Pause after every delete request to stay within the Bot API rate limits
    #[serde(default = "default_delete_interval_ms")]
    pub(crate) delete_interval_ms: u64,

    #[serde(default = "default_delete_max_retries")]
    pub(crate) delete_max_retries: u32,
}

impl Config {
    pub(crate) fn delete_interval(&self) -> Duration {
        Duration::from_millis(self.delete_interval_ms)
    }
}

fn default_delete_interval_ms() -> u64 {
    100
}

fn default_delete_max_retries() -> u32 {
    3
}

fn deserialize_recipient<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Recipient, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_recipient(&raw).map_err(serde::de::Error::custom)
}

fn parse_recipient(raw: &str) -> Result<Recipient, String> {
    let raw = raw.trim();

    if let Ok(id) = raw.parse::<i64>() {
        return Ok(Recipient::Id(ChatId(id)));
    }

    if raw.len() > 1 && raw.starts_with('@') {
        return Ok(Recipient::ChannelUsername(raw.to_owned()));
    }

    Err(format!(
        "expected a numeric chat ID or a @channel_username, but got {raw:?}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn recipient_parsing() {
        #[track_caller]
        fn test(raw: &str, expected: expect_test::Expect) {
            expected.assert_eq(&format!("{:?}", parse_recipient(raw)));
        }

        test("-1001234567890", expect!["Ok(Id(ChatId(-1001234567890)))"]);
        test(" 42 ", expect!["Ok(Id(ChatId(42)))"]);
        test(
            "@weather_channel",
            expect![[r#"Ok(ChannelUsername("@weather_channel"))"#]],
        );
        test(
            "@",
            expect![[r#"Err("expected a numeric chat ID or a @channel_username, but got \"@\"")"#]],
        );
        test(
            "weather_channel",
            expect![[
                r#"Err("expected a numeric chat ID or a @channel_username, but got \"weather_channel\"")"#
            ]],
        );
    }
}
