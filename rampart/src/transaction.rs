use crate::aggregator::Aggregator;
use rampart_core::{Labels, LABEL_TRANSACTION, TRANSACTION_DURATION, TRANSACTION_FAILED};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Transaction hook used by the `#[transaction]` macro. Not intended to be used manually.
pub async fn transaction_hook<T, R, E>(name: &'static str, func: T) -> T::Output
where
    T: Future<Output = Result<R, E>>,
{
    if let Ok(hook) = TRANSACTION_HOOK.try_with(|v| v.clone()) {
        let start = Instant::now();
        let res = func.await;
        let elapsed = start.elapsed();

        let labels = Labels::new().with(LABEL_TRANSACTION, name);
        hook.record_trend(TRANSACTION_DURATION, &labels, elapsed.as_secs_f64() * 1_000.);
        hook.record_rate(TRANSACTION_FAILED, &labels, res.is_err());

        res
    } else {
        tracing::error!("No hook available.");
        func.await
    }
}

tokio::task_local! {
    pub(crate) static TRANSACTION_HOOK: Arc<Aggregator>;
}
