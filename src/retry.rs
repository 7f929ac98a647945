//! Exponential backoff for custom resources whose reconciliation keeps failing. Nothing is retried
//! within a pass; instead the reconciler asks for the whole pass to be requeued after the next backoff.
use crate::resource::ObjectId;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Configuration that determines the behavior of an exponential backoff.
/// The `Default` impl will use an `initial_interval` of 500 milliseconds,
/// a `max_interval` of 10 minutes, a multiplier of 1.5, and it will never
/// "give up". Durations are given in milliseconds when deserialized.
///
/// ```rust
/// use kogito_operator::retry::BackoffConfig;
/// use std::time::Duration;
///
/// let backoff_config = BackoffConfig {
///     max_interval: Duration::from_secs(1800),
///     ..Default::default()
/// };
///
/// assert_eq!(Duration::from_secs(1800), backoff_config.max_interval);
/// assert_eq!(Duration::from_millis(500), backoff_config.initial_interval);
/// assert!(backoff_config.give_up_after.is_none());
/// assert_eq!(1.5, backoff_config.multiplier);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// The backoff after the first failed pass
    #[serde(with = "millis")]
    pub initial_interval: Duration,

    /// The maximum interval that will ever be returned by a backoff
    #[serde(with = "millis")]
    pub max_interval: Duration,

    /// Stop requeueing once this much time has passed since the first failure. The resource is still
    /// reconciled again when it changes.
    #[serde(with = "option_millis")]
    pub give_up_after: Option<Duration>,

    pub multiplier: f64,

    /// Varies each backoff by at most this factor in either direction
    pub randomization_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> BackoffConfig {
        BackoffConfig {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(600),
            give_up_after: None,
            multiplier: 1.5,
            randomization_factor: 0.5,
        }
    }
}

impl BackoffConfig {
    /// Backoff at a fixed interval that never increases, without randomization
    pub fn fixed_interval(interval: Duration) -> BackoffConfig {
        BackoffConfig {
            initial_interval: interval,
            max_interval: interval,
            give_up_after: None,
            multiplier: 1.0,
            randomization_factor: 0.0,
        }
    }

    pub fn disable_randomization(mut self) -> Self {
        self.randomization_factor = 0.0;
        self
    }

    fn new_backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: self.give_up_after,
            randomization_factor: self.randomization_factor,
            start_time: Instant::now(),
            ..Default::default()
        }
    }
}

/// Tracks the error backoff of each custom resource. The backoff keeps growing until
/// `reset_backoff` is called after a successful pass.
///
/// ```rust
/// use kogito_operator::retry::{BackoffConfig, ErrorBackoff};
/// use kogito_operator::resource::ObjectId;
///
/// let config = BackoffConfig::default().disable_randomization();
/// let error_backoff = ErrorBackoff::new(config.clone());
/// let id = ObjectId::new("kogito", "example-quarkus");
///
/// let mut duration = error_backoff.next_error_backoff(&id).unwrap();
/// for _ in 0..5 {
///     let next = error_backoff.next_error_backoff(&id).unwrap();
///     assert!(next > duration);
///     duration = next;
/// }
///
/// error_backoff.reset_backoff(&id);
/// assert_eq!(Some(config.initial_interval), error_backoff.next_error_backoff(&id));
/// ```
#[derive(Debug, Default, Clone)]
pub struct ErrorBackoff {
    backoff_state: Arc<Mutex<HashMap<ObjectId, backoff::ExponentialBackoff>>>,
    backoff_config: BackoffConfig,
}

impl ErrorBackoff {
    pub fn new(backoff_config: BackoffConfig) -> ErrorBackoff {
        ErrorBackoff {
            backoff_config,
            backoff_state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the next backoff for the given custom resource, or `None` once `give_up_after` has elapsed
    pub fn next_error_backoff(&self, id: &ObjectId) -> Option<Duration> {
        use backoff::backoff::Backoff;

        let mut backoffs = self.lock();
        let config = &self.backoff_config;
        backoffs
            .entry(id.clone())
            .or_insert_with(|| config.new_backoff())
            .next_backoff()
    }

    pub fn reset_backoff(&self, id: &ObjectId) {
        self.lock().remove(id);
    }

    fn lock(&self) -> MutexGuard<HashMap<ObjectId, backoff::ExponentialBackoff>> {
        // the map is always left consistent, so a poisoned lock is still usable
        self.backoff_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// (De)serializes a `Duration` as a number of milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub(crate) mod option_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
    }
}
