//! Cross-frame synchronization: the frame completion counter, the inflight-frame
//! semaphore and the logical queues with their timeline counters.

pub mod frame_completion;
pub mod queue;
