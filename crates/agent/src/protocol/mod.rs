pub mod command;
pub mod crc32;
pub mod frame;
pub mod response;

pub use command::Command;
pub use frame::{Frame, FrameDecoder};
pub use response::{LoadErrorCode, ResultLine, StartStatus, StopStatus};
