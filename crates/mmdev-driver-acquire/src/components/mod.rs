//! Frame source plumbing:
//! - `source`: the `FrameSource` contract and configuration types
//! - `frame`: on-ring frame records and mapped spans
//! - `ring`: bounded per-stream byte ring
//! - `simulated`: in-process runtime with simulated cameras

pub mod frame;
pub mod ring;
pub mod simulated;
pub mod source;
