use std::time::Duration;

use serde::{Deserialize, Deserializer};
use uuid::Uuid;

/// Configuration of a [`Mediator`](crate::Mediator).
///
/// Deserializes from e.g. `{"queue_capacity": 16, "induced_delay_ms": 250}`; missing fields
/// fall back to [`MediatorConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// How many dispatched commands may wait for the worker before `dispatch` blocks.
    pub queue_capacity: usize,
    /// Upper bound of a random pause taken before every handler and processor invocation.
    #[serde(rename = "induced_delay_ms", deserialize_with = "millis")]
    pub induced_delay: Option<Duration>,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            induced_delay: None,
        }
    }
}

impl MediatorConfig {
    /// Pauses of up to `max` before each handler or processor, to surface ordering
    /// assumptions in tests and demos.
    pub fn eventually_consistent(max: Duration) -> Self {
        Self::default().with_induced_delay(max)
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_induced_delay(mut self, max: Duration) -> Self {
        self.induced_delay = Some(max);
        self
    }

    /// Capacity of the command queue; a queue always holds at least one command.
    pub(crate) fn effective_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

/// A uniformly random duration in `[0, max)`.
pub(crate) fn jitter(max: Duration) -> Duration {
    let bound = max.as_millis();
    if bound == 0 {
        return Duration::ZERO;
    }
    // a v4 uuid is only used here as a source of random bits
    let millis = Uuid::new_v4().as_u128() % bound;
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Sleeps for a random part of `max`, if set.
pub(crate) async fn induce_delay(max: Option<Duration>) {
    if let Some(max) = max {
        let pause = jitter(max);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}
