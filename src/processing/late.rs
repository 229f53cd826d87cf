//! Late-data counter decorator

use crate::entity::Event;
use crate::pipeline::{PipelineResult, Processing};
use crate::processing::payload::validate_date;
use crate::processing::{
    EVENT_NAME_CLUSTER_EVENT, EVENT_NAME_CLUSTER_STATE, EVENT_NAME_HOST_STATE,
    EVENT_NAME_INFRA_ENV,
};
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use prometheus::{IntCounterVec, Opts, Registry};
use tracing::error;

/// Wall clock seam so tests can pin "now".
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Counts successfully processed events whose own timestamp falls on or
/// before the daily deadline.
///
/// Registered as `processing_late_data_total{name, event_day}`. Host-state
/// events are excluded (they only feed the cache) and failed events are
/// never counted. Downstream publishes the previous day twice per day, the
/// last time at 14:00 UTC; before that cutoff yesterday's data is not late
/// yet, after it only the current day is on time.
pub struct CountLateData<T, C = SystemClock> {
    inner: T,
    counter: IntCounterVec,
    clock: C,
}

impl<T> CountLateData<T, SystemClock> {
    /// Wrap the inner processing using the system clock.
    pub fn new(inner: T, registry: &Registry) -> Result<Self, prometheus::Error> {
        Self::with_clock(inner, registry, SystemClock)
    }
}

impl<T, C> CountLateData<T, C>
where
    C: Clock,
{
    /// Wrap the inner processing with an explicit clock.
    pub fn with_clock(inner: T, registry: &Registry, clock: C) -> Result<Self, prometheus::Error> {
        let opts = Opts::new("late_data_total", "Late data counter by event name and day.")
            .namespace("processing".to_string());

        let counter = IntCounterVec::new(opts, &["name", "event_day"])?;
        registry.register(Box::new(counter.clone()))?;

        Ok(Self {
            inner,
            counter,
            clock,
        })
    }

    fn deadline(&self) -> DateTime<Utc> {
        compute_deadline(self.clock.now_utc())
    }
}

#[async_trait]
impl<T, C> Processing<Event> for CountLateData<T, C>
where
    T: Processing<Event>,
    C: Clock,
{
    async fn process(&self, event: &Event) -> PipelineResult {
        // Count only successfully processed data
        self.inner.process(event).await?;

        if event.name == EVENT_NAME_HOST_STATE {
            return Ok(());
        }

        let event_time = match extract_event_time(event) {
            Ok(event_time) => event_time,
            Err(err) => {
                // Not a processing error
                error!(error = %err, "failed to extract time to count late data");

                return Ok(());
            }
        };

        if event_time > self.deadline() {
            return Ok(());
        }

        let event_day = event_time.format("%Y-%m-%d").to_string();
        self.counter
            .with_label_values(&[event.name.as_str(), event_day.as_str()])
            .inc();

        Ok(())
    }
}

fn extract_event_time(event: &Event) -> anyhow::Result<DateTime<Utc>> {
    let key = match event.name.as_str() {
        EVENT_NAME_CLUSTER_EVENT => "event_time",
        EVENT_NAME_CLUSTER_STATE | EVENT_NAME_INFRA_ENV => "updated_at",
        other => return Err(anyhow!("no timestamp field for event name {other:?}")),
    };

    let raw = event
        .payload
        .get(key)
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("missing or non-string {key}"))?;

    validate_date(raw).with_context(|| format!("invalid {key}"))
}

fn compute_deadline(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let cutoff = today + Duration::hours(14);

    if now >= cutoff {
        today
    } else {
        today - Duration::days(1)
    }
}
