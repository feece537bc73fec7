use lazy_static::lazy_static;
use prometheus::CounterVec;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::Opts;
use prometheus::Registry;
use slog::debug;
use slog::Logger;

lazy_static! {
    pub static ref MONGODB_OP_ERRORS_COUNT: CounterVec = CounterVec::new(
        Opts::new(
            "mongorows_mongodb_operation_errors",
            "Number of MongoDB operations failed"
        ),
        &["operation"]
    )
    .expect("Failed to create MONGODB_OP_ERRORS_COUNT counter");
    pub static ref MONGODB_OPS_COUNT: CounterVec = CounterVec::new(
        Opts::new(
            "mongorows_mongodb_operations",
            "Number of MongoDB operations issued"
        ),
        &["operation"]
    )
    .expect("Failed to create MONGODB_OPS_COUNT counter");
    pub static ref MONGODB_OPS_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "mongorows_mongodb_operations_duration",
            "Duration (in seconds) of MongoDB operations"
        ),
        &["operation"]
    )
    .expect("Failed to create MONGODB_OPS_DURATION histogram");
    pub static ref ROWS_COUNT: CounterVec = CounterVec::new(
        Opts::new(
            "mongorows_rows",
            "Number of rows produced for the import pipeline"
        ),
        &["collection"]
    )
    .expect("Failed to create ROWS_COUNT counter");
}

/// Attempts to register metrics with the Registry.
///
/// Metrics that fail to register are logged and ignored.
pub fn register_metrics(logger: &Logger, registry: &Registry) {
    if let Err(error) = registry.register(Box::new(MONGODB_OP_ERRORS_COUNT.clone())) {
        debug!(logger, "Failed to register MONGODB_OP_ERRORS_COUNT"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(MONGODB_OPS_COUNT.clone())) {
        debug!(logger, "Failed to register MONGODB_OPS_COUNT"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(MONGODB_OPS_DURATION.clone())) {
        debug!(logger, "Failed to register MONGODB_OPS_DURATION"; "error" => ?error);
    }
    if let Err(error) = registry.register(Box::new(ROWS_COUNT.clone())) {
        debug!(logger, "Failed to register ROWS_COUNT"; "error" => ?error);
    }
}
