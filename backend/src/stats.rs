//! Process metrics, rendered in the Prometheus text format on `GET /metrics`.

use metrics::Counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Users seen for the first time in a calendar month. Incremented once per user per month.
pub const MAU_UNIQUE_USERS_SEEN: &str = "mau_unique_users_seen_total";

pub struct Metrics {
    handle: Option<PrometheusHandle>,
    pub mau_unique_users_seen: Counter,
}

impl Metrics {
    /// Install the Prometheus recorder as the process-wide recorder. Counters registered before
    /// this call record nothing.
    pub fn install() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        metrics::describe_counter!(
            MAU_UNIQUE_USERS_SEEN,
            "Users seen for the first time in the current calendar month"
        );
        Ok(Self {
            handle: Some(handle),
            mau_unique_users_seen: metrics::counter!(MAU_UNIQUE_USERS_SEEN),
        })
    }

    /// Counters that record nothing. `render` returns `None`.
    pub fn disabled() -> Self {
        Self {
            handle: None,
            mau_unique_users_seen: Counter::noop(),
        }
    }

    /// A recorder owned by this value rather than installed globally, so tests can read back
    /// exactly what they recorded.
    #[cfg(test)]
    pub fn local() -> Self {
        use metrics::{Key, Level, Metadata, Recorder};

        let recorder = PrometheusBuilder::new().build_recorder();
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
        let counter =
            recorder.register_counter(&Key::from_static_name(MAU_UNIQUE_USERS_SEEN), &metadata);
        Self {
            handle: Some(recorder.handle()),
            mau_unique_users_seen: counter,
        }
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(|handle| handle.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_counter() {
        let metrics = Metrics::local();
        metrics.mau_unique_users_seen.increment(1);
        metrics.mau_unique_users_seen.increment(1);
        let body = metrics.render().unwrap();
        assert!(body.contains("mau_unique_users_seen_total 2"), "{}", body);
    }

    #[test]
    fn test_disabled_renders_nothing() {
        let metrics = Metrics::disabled();
        metrics.mau_unique_users_seen.increment(1);
        assert!(metrics.render().is_none());
    }
}
