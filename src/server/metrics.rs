//! Prometheus exposition of hierarchy statistics.
//!
//! Tier counters already live in each tier's `StatsRecorder`, so the gauges
//! here are refreshed from a snapshot at scrape time instead of being
//! updated on the hot path.

use prometheus::{Encoder, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::HierarchyStats;

pub struct CacheMetrics {
    registry: Registry,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    evictions: IntGaugeVec,
    errors: IntGaugeVec,
    entries: IntGaugeVec,
    size_bytes: IntGaugeVec,
    hit_ratio: GaugeVec,
    latency_us: GaugeVec,
    relationship_graph_size: IntGauge,
    tracked_keys: IntGauge,
}

fn tier_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGaugeVec, prometheus::Error> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), &["tier"])?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn tier_float_gauge(registry: &Registry, name: &str, help: &str) -> Result<GaugeVec, prometheus::Error> {
    let gauge = GaugeVec::new(Opts::new(name, help), &["tier"])?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl CacheMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let relationship_graph_size = IntGauge::with_opts(Opts::new(
            "cache_relationship_graph_keys",
            "Keys with at least one registered relationship",
        ))?;
        registry.register(Box::new(relationship_graph_size.clone()))?;

        let tracked_keys = IntGauge::with_opts(Opts::new(
            "cache_tracked_keys",
            "Keys in the coordinator access-count table",
        ))?;
        registry.register(Box::new(tracked_keys.clone()))?;

        Ok(Self {
            hits: tier_gauge(&registry, "cache_hits", "Lookups served by the tier")?,
            misses: tier_gauge(&registry, "cache_misses", "Lookups the tier could not serve")?,
            evictions: tier_gauge(&registry, "cache_evictions", "Entries evicted for capacity")?,
            errors: tier_gauge(&registry, "cache_errors", "Storage faults absorbed by the tier")?,
            entries: tier_gauge(&registry, "cache_entries", "Entries currently stored")?,
            size_bytes: tier_gauge(&registry, "cache_size_bytes", "Bytes currently stored")?,
            hit_ratio: tier_float_gauge(&registry, "cache_hit_ratio", "Hits over lookups")?,
            latency_us: tier_float_gauge(
                &registry,
                "cache_access_latency_us",
                "Moving average of access latency in microseconds",
            )?,
            relationship_graph_size,
            tracked_keys,
            registry,
        })
    }

    /// Copy a statistics snapshot into the gauges.
    pub fn observe(&self, stats: &HierarchyStats) {
        for (tier, s) in &stats.tiers {
            let labels = [tier.as_str()];
            self.hits.with_label_values(&labels).set(s.hits as i64);
            self.misses.with_label_values(&labels).set(s.misses as i64);
            self.evictions.with_label_values(&labels).set(s.evictions as i64);
            self.errors.with_label_values(&labels).set(s.errors as i64);
            self.entries.with_label_values(&labels).set(s.entries as i64);
            self.size_bytes.with_label_values(&labels).set(s.size_bytes as i64);
            self.hit_ratio.with_label_values(&labels).set(s.hit_ratio());
            self.latency_us
                .with_label_values(&labels)
                .set(s.avg_access_latency_us);
        }
        self.relationship_graph_size
            .set(stats.relationship_graph_size as i64);
        self.tracked_keys.set(stats.tracked_keys as i64);
    }

    /// Render every registered metric in the text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
