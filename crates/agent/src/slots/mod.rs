pub mod escalation;
pub mod table;
pub mod worker;

pub use table::{PendingRequest, Slot, SlotState, SlotTable};
