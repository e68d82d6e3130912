//! Prometheus metrics for the work pool

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, IntCounter,
    IntGauge,
};

lazy_static! {
    /// Current number of queued entries
    pub static ref POOL_DEPTH: IntGauge = register_int_gauge!(
        "work_pool_depth",
        "Current number of queued work items"
    )
    .unwrap();

    /// Total add attempts by outcome
    pub static ref POOL_ADD_TOTAL: CounterVec = register_counter_vec!(
        "work_pool_add_total",
        "Total work items offered to the pool",
        &["outcome"]
    )
    .unwrap();

    /// Total removals by mode
    pub static ref POOL_REMOVE_TOTAL: CounterVec = register_counter_vec!(
        "work_pool_remove_total",
        "Total work items removed from the pool",
        &["mode"]
    )
    .unwrap();

    /// Total pool shutdowns
    pub static ref POOL_SHUTDOWN_TOTAL: IntCounter = register_int_counter!(
        "work_pool_shutdown_total",
        "Total pools shut down"
    )
    .unwrap();
}
