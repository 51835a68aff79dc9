pub mod dequeue;
pub mod heartbeat;
pub mod lsif_data;
pub mod mark;
pub mod requeue;
pub mod reset_stalled;
pub mod uploads;
