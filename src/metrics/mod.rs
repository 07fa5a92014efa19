//! Metrics Registry (spec §8, "metrics"): ingest and query instrumentation
//! exported through the same `prometheus`+`axum` `/metrics` endpoint shape
//! the teacher's indexing pipeline used, re-themed to this store's own
//! operations -- units imported/removed, map growths, query latency per
//! traversal kind, and visibility-cache effectiveness.

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramVec, Opts, Registry};

pub mod server;

pub use server::{spawn_metrics_server, MetricsState};

pub struct MetricsRegistry {
    pub registry: Registry,

    // Ingest metrics
    pub ingest_duration: Histogram,
    pub units_imported_total: Counter,
    pub units_removed_total: Counter,
    pub units_unchanged_total: Counter,
    pub units_out_of_date_total: Counter,

    // Query metrics
    pub query_duration: HistogramVec,
    pub query_errors_total: CounterVec,
    pub visibility_cache_hits: Counter,
    pub visibility_cache_misses: Counter,

    // Store resource metrics
    pub map_size_bytes: Gauge,
    pub map_growths_total: Counter,
    pub monitored_units: Gauge,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ingest_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "ingest_duration_seconds",
                "Time to diff and commit one unit import",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
        )?;

        let units_imported_total = Counter::new(
            "units_imported_total",
            "Total number of units registered (new or reimported)",
        )?;

        let units_removed_total = Counter::new(
            "units_removed_total",
            "Total number of units explicitly removed from the store",
        )?;

        let units_unchanged_total = Counter::new(
            "units_unchanged_total",
            "Total number of register calls that were a no-op (mod-time unchanged)",
        )?;

        let units_out_of_date_total = Counter::new(
            "units_out_of_date_total",
            "Total number of times a unit was newly marked out of date",
        )?;

        let query_duration_opts = prometheus::HistogramOpts::new(
            "query_duration_seconds",
            "Query engine traversal duration in seconds, labeled by query kind",
        )
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]);
        let query_duration = HistogramVec::new(query_duration_opts, &["kind"])?;

        let query_errors_total =
            CounterVec::new(Opts::new("query_errors_total", "Total number of failed queries, by kind"), &["kind"])?;

        let visibility_cache_hits = Counter::new(
            "visibility_cache_hits_total",
            "Total number of visibility checks served from the unit-visibility cache",
        )?;

        let visibility_cache_misses = Counter::new(
            "visibility_cache_misses_total",
            "Total number of visibility checks that required walking the root-unit graph",
        )?;

        let map_size_bytes = Gauge::new(
            "map_size_bytes",
            "Current LMDB memory map size for this environment",
        )?;

        let map_growths_total = Counter::new(
            "map_growths_total",
            "Total number of times the memory map was grown after MDB_MAP_FULL",
        )?;

        let monitored_units = Gauge::new(
            "monitored_units",
            "Current number of units with a live UnitMonitor",
        )?;

        registry.register(Box::new(ingest_duration.clone()))?;
        registry.register(Box::new(units_imported_total.clone()))?;
        registry.register(Box::new(units_removed_total.clone()))?;
        registry.register(Box::new(units_unchanged_total.clone()))?;
        registry.register(Box::new(units_out_of_date_total.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(query_errors_total.clone()))?;
        registry.register(Box::new(visibility_cache_hits.clone()))?;
        registry.register(Box::new(visibility_cache_misses.clone()))?;
        registry.register(Box::new(map_size_bytes.clone()))?;
        registry.register(Box::new(map_growths_total.clone()))?;
        registry.register(Box::new(monitored_units.clone()))?;

        Ok(Self {
            registry,
            ingest_duration,
            units_imported_total,
            units_removed_total,
            units_unchanged_total,
            units_out_of_date_total,
            query_duration,
            query_errors_total,
            visibility_cache_hits,
            visibility_cache_misses,
            map_size_bytes,
            map_growths_total,
            monitored_units,
        })
    }

    pub fn init(&self) -> Result<(), prometheus::Error> {
        Ok(())
    }
}
