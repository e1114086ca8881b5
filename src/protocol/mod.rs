//! Protocol definitions for the module's UART command interface.
//!
//! This module contains the low-level protocol types:
//! - Frame encoding/decoding with checksums
//! - Command opcodes and typed command construction
//! - Reply and indication parsing

pub mod command;
pub mod frame;
pub mod response;

pub use command::{Command, CommandOpcode, JoinMode, REPLY_FLAG};
pub use frame::{FRAME_START, FrameDecoder, RawFrame, encode as encode_frame};
pub use response::{
    ActivationStatus, Indication, Response, SessionStatus, is_indication, join_failure,
    transmit_failure,
};
