use thiserror::Error;

/// Internal failures of a scheduling computation.
///
/// These never leave [`crate::VerificationScheduler::next_check`]; they are
/// logged and turned into a short fixed retry there.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Adding an offset to a timestamp left chrono's representable range.
    #[error("Timestamp out of range: {0}")]
    TimeOverflow(String),

    /// The scheduler was built with values it cannot compute with.
    #[error("Invalid schedule configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
