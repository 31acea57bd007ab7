use std::future::Future;
use std::time::Duration;

/// Abstracts over how a polling loop waits, so tests can drive time
/// themselves instead of sleeping for real.
pub trait SleepProvider {
    fn sleep(&self, dur: Duration) -> impl Future<Output = ()> + Send;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

impl SleepProvider for TokioSleep {
    async fn sleep(&self, dur: Duration) {
        tokio::time::sleep(dur).await
    }
}
