//! Change-event transport boundary.
//!
//! The traits describe what the crate needs from the change-data-capture
//! transport; the in-memory backend implements them in-process.

mod memory;
mod traits;

pub use memory::MemoryEventSource;
pub use traits::{
    ChangeEventSource, ChannelEvent, ChannelEventHandler, ChannelHandle, ChannelKind, ChannelSpec,
    ChannelState, RawChange,
};
