use thiserror::Error;

/// Structured errors surfaced by the filter core.
///
/// Registry and preset operations return these so a caller can revert the
/// control that produced them and show an inline message. None of them are
/// fatal to the frame loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Chip registry is full ({capacity} chips), delete a chip before adding another")]
    CapacityExceeded { capacity: usize },
    #[error("{field} value {value} is outside [{min}, {max}]")]
    InvalidRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("Invalid hex color format: {0}")]
    InvalidColorFormat(String),
    #[error("Unknown id: {0}")]
    NotFound(String),
    #[error("Uniform block declares {active_count} active slots but holds {capacity}")]
    MalformedUniformBlock { active_count: usize, capacity: usize },
    #[error("Frame has zero width or height")]
    EmptyFrame,
}

pub type FilterResult<T> = std::result::Result<T, FilterError>;

/// Reject `value` unless it lies in `[min, max]`.
pub(crate) fn check_range(field: &'static str, value: f32, min: f32, max: f32) -> FilterResult<f32> {
    if value.is_finite() && value >= min && value <= max {
        Ok(value)
    } else {
        Err(FilterError::InvalidRange { field, value, min, max })
    }
}
