//! Prometheus metrics for the transport layer

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

lazy_static! {
    /// Total retrievals by outcome
    pub static ref TRANSPORT_GET_TOTAL: CounterVec = register_counter_vec!(
        "transport_get_total",
        "Total message retrieval attempts",
        &["outcome"]
    )
    .unwrap();

    /// Total sends by message kind and status
    pub static ref TRANSPORT_PUT_TOTAL: CounterVec = register_counter_vec!(
        "transport_put_total",
        "Total messages sent",
        &["kind", "status"]
    )
    .unwrap();

    /// Total unit-of-work boundaries by operation
    pub static ref TRANSPORT_UOW_TOTAL: CounterVec = register_counter_vec!(
        "transport_uow_total",
        "Total unit-of-work commits and rollbacks",
        &["op"]
    )
    .unwrap();

    /// Total messages moved to the backout queue
    pub static ref TRANSPORT_DEAD_LETTER_TOTAL: IntCounter = register_int_counter!(
        "transport_dead_letter_total",
        "Total messages escalated to the backout queue"
    )
    .unwrap();
}
