use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;

use crate::protocol::Payload;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComputeError {
    #[error("payload has no integer \"number\" field")]
    MissingNumber,

    #[error("square of {0} does not fit in 64 bits")]
    Overflow(i64),
}

/// The work a worker performs on each payload.
pub trait Compute {
    fn compute(
        &self,
        payload: &Payload,
    ) -> impl Future<Output = Result<Value, ComputeError>> + Send;
}

/// Reference workload: squares `payload["number"]`.
#[derive(Debug, Clone, Default)]
pub struct Squarer {
    delay: Option<(Duration, Duration)>,
}

impl Squarer {
    /// Answer immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep a uniformly random time in `min..=max` before answering.
    pub fn with_jitter(min: Duration, max: Duration) -> Self {
        Self {
            delay: Some((min, max.max(min))),
        }
    }

    /// The 100 to 500 ms delay the stock workers simulate.
    pub fn reference() -> Self {
        Self::with_jitter(Duration::from_millis(100), Duration::from_millis(500))
    }

    fn square(payload: &Payload) -> Result<i64, ComputeError> {
        let n = payload
            .get("number")
            .and_then(Value::as_i64)
            .ok_or(ComputeError::MissingNumber)?;
        n.checked_mul(n).ok_or(ComputeError::Overflow(n))
    }
}

impl Compute for Squarer {
    async fn compute(&self, payload: &Payload) -> Result<Value, ComputeError> {
        if let Some((min, max)) = self.delay {
            let pause = {
                let mut rng = rand::thread_rng();
                rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64)
            };
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
        Ok(Value::from(Self::square(payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::source::number_payload;

    #[tokio::test]
    async fn squares_the_number() {
        let out = Squarer::new().compute(&number_payload(4)).await.unwrap();
        assert_eq!(out, Value::from(16));

        let out = Squarer::new().compute(&number_payload(-7)).await.unwrap();
        assert_eq!(out, Value::from(49));
    }

    #[tokio::test]
    async fn missing_number_is_an_error() {
        let mut payload = Payload::new();
        payload.insert("number".into(), Value::from("four"));
        assert_eq!(
            Squarer::new().compute(&payload).await,
            Err(ComputeError::MissingNumber)
        );
        assert_eq!(
            Squarer::new().compute(&Payload::new()).await,
            Err(ComputeError::MissingNumber)
        );
    }

    #[tokio::test]
    async fn overflow_is_an_error() {
        let big = i64::MAX / 2;
        assert_eq!(
            Squarer::new().compute(&number_payload(big)).await,
            Err(ComputeError::Overflow(big))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_stays_within_bounds() {
        let squarer = Squarer::reference();
        let started = tokio::time::Instant::now();
        let out = squarer.compute(&number_payload(3)).await.unwrap();
        let elapsed = started.elapsed();
        assert_eq!(out, Value::from(9));
        assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(501), "{elapsed:?}");
    }
}
