use crate::prelude::*;
use async_trait::async_trait;
use easy_ext::ext;
use std::future::Future;
use std::time::Duration;

#[ext(FutureExt)]
#[async_trait(?Send)]
pub(crate) impl<F: Future> F {
    async fn with_duration(self) -> (F::Output, Duration) {
        let start = std::time::Instant::now();
        let output = self.await;
        (output, start.elapsed())
    }
}

#[ext(TryFutureExt)]
#[async_trait(?Send)]
pub(crate) impl<T, E, F> F
where
    F: Future<Output = Result<T, E>>,
{
    async fn with_duration_log(self, msg: &'static str) -> F::Output {
        let (result, duration) = self.with_duration().await;
        let duration = tracing_duration(duration);
        match &result {
            Ok(_) => info!(result = "ok", duration, "{msg}"),
            Err(_) => warn!(result = "err", duration, "{msg}"),
        }
        result
    }
}
