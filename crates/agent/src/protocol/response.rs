//! Wire response formatting (C6 output half).
//!
//! `Display` on these types *is* the wire format, byte for byte, so no
//! `thiserror` derive is used here -- these are response DTOs, not the
//! internal errors that get logged (see `crate::error`).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadErrorCode {
    BadParams,
    NoSlot,
    Full { msg: &'static str },
    BadVictim,
    Busy,
    NoMem,
    Timeout,
    BadCrc { expected: String, got: String },
    LoadFail { msg: String },
    InstantiateFail { msg: String },
    NoExecEnv,
}

impl fmt::Display for LoadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadErrorCode::BadParams => write!(f, "BAD_PARAMS"),
            LoadErrorCode::NoSlot => write!(f, "NO_SLOT"),
            LoadErrorCode::Full { msg } => write!(f, "FULL msg=\"{}\"", msg),
            LoadErrorCode::BadVictim => write!(f, "BAD_VICTIM"),
            LoadErrorCode::Busy => write!(f, "BUSY"),
            LoadErrorCode::NoMem => write!(f, "NO_MEM"),
            LoadErrorCode::Timeout => write!(f, "TIMEOUT"),
            LoadErrorCode::BadCrc { expected, got } => {
                write!(f, "BAD_CRC msg=\"expected={} got={}\"", expected, got)
            }
            LoadErrorCode::LoadFail { msg } => write!(f, "LOAD_FAIL msg=\"{}\"", msg),
            LoadErrorCode::InstantiateFail { msg } => {
                write!(f, "INSTANTIATE_FAIL msg=\"{}\"", msg)
            }
            LoadErrorCode::NoExecEnv => write!(f, "NO_EXEC_ENV"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartStatus {
    NoModule,
    NoMem { free: u32 },
    Busy,
    NoEntrypoint,
}

impl fmt::Display for StartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartStatus::NoModule => write!(f, "NO_MODULE"),
            StartStatus::NoMem { free } => write!(f, "NO_MEM free={}", free),
            StartStatus::Busy => write!(f, "BUSY"),
            StartStatus::NoEntrypoint => write!(f, "NO_ENTRYPOINT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopStatus {
    Idle,
    NoJob,
    Pending,
}

impl fmt::Display for StopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopStatus::Idle => write!(f, "IDLE"),
            StopStatus::NoJob => write!(f, "NO_JOB"),
            StopStatus::Pending => write!(f, "PENDING"),
        }
    }
}

/// A RESULT line emitted asynchronously by a worker or the escalation timer,
/// or synchronously by the dispatcher's own admission checks on START.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultLine {
    /// Immediate rejection of a START, checked before the slot is admitted.
    StartRejected(StartStatus),
    Ok {
        module_id: String,
        func: String,
        ret_i32: Option<u32>,
    },
    Exception {
        module_id: String,
        func: String,
        msg: String,
    },
    Stopped {
        module_id: String,
        func: String,
        msg: String,
    },
    StoppedForced {
        module_id: String,
        func: String,
    },
    NoFunc,
    NoExecEnv {
        free: Option<u32>,
    },
}

impl fmt::Display for ResultLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultLine::StartRejected(status) => write!(f, "RESULT status={}", status),
            ResultLine::Ok {
                module_id,
                func,
                ret_i32,
            } => match ret_i32 {
                Some(v) => write!(
                    f,
                    "RESULT status=OK module_id={} func={} ret_i32={}",
                    module_id, func, v
                ),
                None => write!(f, "RESULT status=OK module_id={} func={}", module_id, func),
            },
            ResultLine::Exception {
                module_id,
                func,
                msg,
            } => write!(
                f,
                "RESULT status=EXCEPTION module_id={} func={} msg=\"{}\"",
                module_id, func, msg
            ),
            ResultLine::Stopped {
                module_id,
                func,
                msg,
            } => write!(
                f,
                "RESULT status=STOPPED module_id={} func={} msg=\"{}\"",
                module_id, func, msg
            ),
            ResultLine::StoppedForced { module_id, func } => write!(
                f,
                "RESULT status=STOPPED forced=1 module_id={} func={}",
                module_id, func
            ),
            ResultLine::NoFunc => write!(f, "RESULT status=NO_FUNC"),
            ResultLine::NoExecEnv { free } => match free {
                Some(bytes) => write!(f, "RESULT status=NO_EXEC_ENV msg=\"free={}\"", bytes),
                None => write!(f, "RESULT status=NO_EXEC_ENV"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_crc_formats_expected_and_got() {
        let code = LoadErrorCode::BadCrc {
            expected: "deadbeef".to_string(),
            got: "cafebabe".to_string(),
        };
        assert_eq!(
            code.to_string(),
            "BAD_CRC msg=\"expected=deadbeef got=cafebabe\""
        );
    }

    #[test]
    fn result_ok_without_return_value_omits_ret_i32() {
        let line = ResultLine::Ok {
            module_id: "m1".to_string(),
            func: "toggle_forever".to_string(),
            ret_i32: None,
        };
        assert_eq!(
            line.to_string(),
            "RESULT status=OK module_id=m1 func=toggle_forever"
        );
    }

    #[test]
    fn result_stopped_forced_has_no_msg() {
        let line = ResultLine::StoppedForced {
            module_id: "m1".to_string(),
            func: "app_main".to_string(),
        };
        assert_eq!(
            line.to_string(),
            "RESULT status=STOPPED forced=1 module_id=m1 func=app_main"
        );
    }
}
