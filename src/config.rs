use std::time::Duration;

use fieldx::fxstruct;

/// Tunables shared by every cache owned by a [`CacheManager`](crate::CacheManager).
///
/// ```ignore
/// let config = CacheConfig::builder()
///     .freshness_window(Duration::from_secs(120))
///     .metrics_capacity(200)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
#[fxstruct(sync, builder, get(copy))]
pub struct CacheConfig {
    /// Age after which the booking collection is considered stale. Stale data is still served.
    #[fieldx(default(Duration::from_secs(5 * 60)))]
    freshness_window: Duration,

    /// Age after which a metrics entry expires.
    #[fieldx(default(Duration::from_secs(5 * 60)))]
    metrics_ttl: Duration,

    /// Maximum number of metric scopes held by the in-process tier.
    #[fieldx(default(1_000))]
    metrics_capacity: u64,

    /// Buffer size of the broadcast side of the event bus.
    #[fieldx(default(64))]
    event_capacity: usize,

    #[fieldx(get(clone), default(String::from("bookings")))]
    bookings_namespace: String,

    #[fieldx(get(clone), default(String::from("metrics")))]
    metrics_namespace: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::new();
        assert_eq!(config.freshness_window(), Duration::from_secs(300));
        assert_eq!(config.metrics_ttl(), Duration::from_secs(300));
        assert_eq!(config.bookings_namespace(), "bookings");
        assert_eq!(config.metrics_namespace(), "metrics");
    }

    #[test]
    fn builder_overrides() {
        let config = CacheConfig::builder()
            .freshness_window(Duration::from_secs(1))
            .metrics_capacity(10)
            .build()
            .expect("config builds");
        assert_eq!(config.freshness_window(), Duration::from_secs(1));
        assert_eq!(config.metrics_capacity(), 10);
        assert_eq!(config.event_capacity(), 64);
    }
}
