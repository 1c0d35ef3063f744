// ===== Types and Structures =====

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    Timeout,
    Crc,
    EndBit,
    Index,
    DataTimeout,
    DataCrc,
    DataEndBit,
    Acmd12Error,
    AdmaError,
    TuningError,
    NoCard,
    UnsupportedCard,
    IoError,
    CommandError,
    InvalidArgument,
    AlignmentError,
    InsufficientDescriptors,
    Busy,
    NotSupported,
    ReTuningRequested,
    UnsupportedClock,
    MemoryError,
    CardError(u32, &'static str), // 包含错误状态和描述
}

// errno values surfaced to the disk layer
const EIO: i32 = 5;
const EAGAIN: i32 = 11;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const ENOTSUP: i32 = 134;
const ETIMEDOUT: i32 = 116;

impl SdError {
    /// True for every error the card or the bus reported while a transfer
    /// was in progress (response error bits, CRC/end-bit/index/timeout
    /// flags, tuning failure).
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            SdError::Timeout
                | SdError::Crc
                | SdError::EndBit
                | SdError::Index
                | SdError::DataTimeout
                | SdError::DataCrc
                | SdError::DataEndBit
                | SdError::Acmd12Error
                | SdError::AdmaError
                | SdError::TuningError
                | SdError::IoError
                | SdError::CommandError
                | SdError::CardError(..)
        )
    }

    /// A re-tuning request aborts the attempt but is not a failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SdError::ReTuningRequested)
    }

    /// Single negative integer status for the disk adapter.
    pub fn errno(&self) -> i32 {
        let code = match self {
            SdError::Busy => EBUSY,
            SdError::NotSupported | SdError::UnsupportedCard | SdError::UnsupportedClock => ENOTSUP,
            SdError::ReTuningRequested => EAGAIN,
            SdError::InvalidArgument
            | SdError::AlignmentError
            | SdError::InsufficientDescriptors => EINVAL,
            SdError::NoCard => ENODEV,
            SdError::MemoryError => ENOMEM,
            SdError::Timeout => ETIMEDOUT,
            _ => EIO,
        };
        -code
    }
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::Timeout => write!(f, "Command timeout error"),
            SdError::Crc => write!(f, "Command CRC error"),
            SdError::EndBit => write!(f, "Command end bit error"),
            SdError::Index => write!(f, "Command index error"),
            SdError::DataTimeout => write!(f, "Data timeout error"),
            SdError::DataCrc => write!(f, "Data CRC error"),
            SdError::DataEndBit => write!(f, "Data end bit error"),
            SdError::Acmd12Error => write!(f, "ACMD12 error"),
            SdError::AdmaError => write!(f, "ADMA error"),
            SdError::TuningError => write!(f, "Tuning error"),
            SdError::NoCard => write!(f, "No card detected"),
            SdError::UnsupportedCard => write!(f, "Unsupported card"),
            SdError::IoError => write!(f, "I/O error"),
            SdError::CommandError => write!(f, "Command error"),
            SdError::InvalidArgument => write!(f, "Invalid argument"),
            SdError::AlignmentError => write!(f, "Buffer not word aligned"),
            SdError::InsufficientDescriptors => write!(f, "ADMA descriptor table too small"),
            SdError::Busy => write!(f, "Controller or card busy"),
            SdError::NotSupported => write!(f, "Function not supported by card"),
            SdError::ReTuningRequested => write!(f, "Re-tuning requested"),
            SdError::UnsupportedClock => write!(f, "Clock ratio cannot be generated"),
            SdError::MemoryError => write!(f, "DMA memory allocation failed"),
            SdError::CardError(status, desc) => write!(f, "Card error: 0x{:X} ({})", status, desc),
        }
    }
}
