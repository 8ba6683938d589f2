//! Debounced trigger dispatch.
//!
//! Events from both detectors are coalesced by the [`debounce`] loop into
//! batches. Each batch becomes one downstream trigger, delivered by the
//! [`delivery`] worker through a [`sink`] with the [`backoff`] retry
//! policy.
//!
//! ```text
//! intake ──▶ run_dispatcher ──▶ batches ──▶ run_delivery_worker ──▶ POST {}
//!              (Debouncer)                    (Deliverer)
//! ```

pub mod backoff;
pub mod debounce;
pub mod delivery;
pub mod sink;

pub use backoff::RetryPolicy;
pub use debounce::{run_dispatcher, Batch, Debouncer};
pub use delivery::{run_delivery_worker, Deliverer, DeliveryOutcome};
pub use sink::{DeliveryError, HttpTrigger, TriggerSink};
