//! Result delivery: ordering, chunking, progress and wire framing.

pub mod coordinator;
pub mod framing;

pub use coordinator::{plan_error_event, split_into_chunks, StreamingCoordinator};
pub use framing::{decode_event, encode_event, read_events, write_event};
