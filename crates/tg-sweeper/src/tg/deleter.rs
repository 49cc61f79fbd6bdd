use super::{Bot, Config};
use crate::ledger::{DeleteOutcome, Deleter, RecordId};
use crate::prelude::*;
use crate::util::retry::RetryPolicy;
use crate::Result;
use async_trait::async_trait;
use std::future::IntoFuture;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{MessageId, Recipient};
use teloxide::{ApiError, RequestError};

/// Rate limit pauses longer than this aren't waited for within the sweep,
/// the message is left for the next one instead
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Deletes the messages that the bot published in the configured chat
pub(crate) struct TgDeleter {
    bot: Bot,
    chat: Recipient,
    retry: RetryPolicy,
    interval: Duration,
}

impl TgDeleter {
    pub(crate) fn new(config: Config) -> Self {
        let retry = RetryPolicy::exponential(
            config.delete_max_retries,
            Duration::from_millis(500),
            Duration::from_secs(10),
        );
        let interval = config.delete_interval();

        Self {
            bot: Bot::new(config.token),
            chat: config.chat,
            retry,
            interval,
        }
    }
}

#[async_trait]
impl Deleter for TgDeleter {
    async fn delete(&self, id: &RecordId) -> Result<DeleteOutcome> {
        let Some(message_id) = to_message_id(id) else {
            warn!(
                message_id = %id,
                "The identifier can't be a Telegram message ID, so there is \
                nothing to delete",
            );
            return Ok(DeleteOutcome::AlreadyGone);
        };

        let result = self
            .retry
            .run_with_min_delay(
                || {
                    self.bot
                        .delete_message(self.chat.clone(), message_id)
                        .into_future()
                },
                is_retryable,
                requested_delay,
            )
            .await;

        tokio::time::sleep(self.interval).await;

        classify(result.map(drop))
    }
}

fn to_message_id(id: &RecordId) -> Option<MessageId> {
    let id = match id {
        RecordId::Int(id) => i32::try_from(*id).ok()?,
        RecordId::Str(id) => id.trim().parse().ok()?,
    };
    Some(MessageId(id))
}

fn is_retryable(err: &RequestError) -> bool {
    match err {
        RequestError::Network(_) | RequestError::Io(_) => true,
        RequestError::RetryAfter(secs) => secs.duration() <= MAX_RETRY_AFTER,
        _ => false,
    }
}

fn requested_delay(err: &RequestError) -> Option<Duration> {
    match err {
        RequestError::RetryAfter(secs) => Some(secs.duration()),
        _ => None,
    }
}

/// Maps the result of the `deleteMessage` Bot API method to the delete outcome.
/// Returns an error only when no other message can be deleted either.
fn classify(result: Result<(), RequestError>) -> Result<DeleteOutcome> {
    let err = match result {
        Ok(()) => return Ok(DeleteOutcome::Deleted),
        Err(err) => err,
    };

    match &err {
        RequestError::Api(ApiError::MessageToDeleteNotFound) => {
            debug!(err = tracing_err(&err), "The message is already gone");
            Ok(DeleteOutcome::AlreadyGone)
        }
        // Returned for messages older than 48 hours, which can never be
        // deleted. The same error is returned when the bot lacks the rights
        // to delete messages in the chat, so it must stand out in the logs.
        RequestError::Api(ApiError::MessageCantBeDeleted) => {
            warn!(
                err = tracing_err(&err),
                "The message can't be deleted, forgetting about it. Make sure \
                the bot has the rights to delete messages in the chat",
            );
            Ok(DeleteOutcome::AlreadyGone)
        }
        RequestError::Api(
            ApiError::InvalidToken
            | ApiError::ChatNotFound
            | ApiError::BotKicked
            | ApiError::BotKickedFromSupergroup,
        ) => Err(err.into()),
        _ => {
            warn!(err = tracing_err(&err), "Failed to delete the message");
            Ok(DeleteOutcome::OtherError)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use teloxide::types::Seconds;

    fn api_err(err: ApiError) -> Result<(), RequestError> {
        Err(RequestError::Api(err))
    }

    fn io_err() -> RequestError {
        RequestError::Io(std::io::ErrorKind::ConnectionReset.into())
    }

    #[test]
    fn successful_delete() {
        assert_matches!(classify(Ok(())), Ok(DeleteOutcome::Deleted));
    }

    #[test]
    fn gone_messages_are_not_retried() {
        assert_matches!(
            classify(api_err(ApiError::MessageToDeleteNotFound)),
            Ok(DeleteOutcome::AlreadyGone)
        );
        assert_matches!(
            classify(api_err(ApiError::MessageCantBeDeleted)),
            Ok(DeleteOutcome::AlreadyGone)
        );
    }

    #[test]
    fn unreachable_chat_aborts() {
        for err in [
            ApiError::InvalidToken,
            ApiError::ChatNotFound,
            ApiError::BotKicked,
            ApiError::BotKickedFromSupergroup,
        ] {
            assert!(classify(api_err(err)).is_err());
        }
    }

    #[test]
    fn other_errors_are_transient() {
        assert_matches!(
            classify(api_err(ApiError::Unknown("Internal Server Error".to_owned()))),
            Ok(DeleteOutcome::OtherError)
        );
        assert_matches!(
            classify(api_err(ApiError::BotBlocked)),
            Ok(DeleteOutcome::OtherError)
        );
    }

    #[test]
    fn exhausted_retries_are_transient() {
        assert_matches!(
            classify(Err(RequestError::RetryAfter(Seconds::from_seconds(5)))),
            Ok(DeleteOutcome::OtherError)
        );
        assert_matches!(
            classify(Err(io_err())),
            Ok(DeleteOutcome::OtherError)
        );
    }

    #[test]
    fn retryable_errors() {
        assert!(is_retryable(&io_err()));
        assert!(is_retryable(&RequestError::RetryAfter(
            Seconds::from_seconds(5)
        )));
        assert!(!is_retryable(&RequestError::RetryAfter(
            Seconds::from_seconds(600)
        )));
        assert!(!is_retryable(&RequestError::Api(
            ApiError::MessageToDeleteNotFound
        )));
    }

    #[test]
    fn rate_limit_delay_is_honored() {
        assert_eq!(
            requested_delay(&RequestError::RetryAfter(Seconds::from_seconds(30))),
            Some(Duration::from_secs(30))
        );
        assert_eq!(requested_delay(&io_err()), None);
    }

    #[test]
    fn message_id_conversion() {
        assert_eq!(to_message_id(&RecordId::Int(42)), Some(MessageId(42)));
        assert_eq!(to_message_id(&RecordId::from("42")), Some(MessageId(42)));
        assert_eq!(to_message_id(&RecordId::from("abc")), None);
        assert_eq!(to_message_id(&RecordId::Int(i64::MAX)), None);
    }
}
