//! Admission control in front of the voice provider.
//!
//! The provider allows only `K` live conversations at once (one on the
//! current plan).  Every session asks the [`AdmissionQueue`] for a slot
//! before opening its voice channel and releases the slot during teardown.
//! Requests beyond `K` wait in strict submission order.
//!
//! * [`QueueState`]: pure bookkeeping (waiting FIFO, active set, sweep).
//! * [`AdmissionQueue`]: cloneable handle to the worker task that owns
//!   the state.

pub mod admission;
pub mod state;

pub use admission::{AdmissionError, AdmissionQueue, PendingAdmission, Ticket};
pub use state::{QueueState, QueueStatus, SlotId};
