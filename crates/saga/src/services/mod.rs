//! Downstream service adapters.
//!
//! Each dependency has a transport trait with an HTTP and an in-memory
//! implementation, plus a client that routes every request through the
//! dependency's [`ResilientCall`](resilience::ResilientCall).

pub mod http;
pub mod inventory;
pub mod observations;
pub mod orders;
pub mod payment;

pub use http::HttpEndpoint;
pub use inventory::{
    HttpInventoryService, InMemoryInventoryService, InventoryClient, InventoryService,
};
pub use observations::{
    HttpRecordService, InMemoryRecordService, Observation, ObservationListing,
    ObservationRecorder, ReconcileReport, RecordOutcome, RecordService,
};
pub use orders::{HttpOrderService, InMemoryOrderService, OrderClient, OrderService};
pub use payment::{
    ChargeOutcome, ChargeRequest, HttpPaymentService, InMemoryPaymentService, PaymentClient,
    PaymentService,
};
