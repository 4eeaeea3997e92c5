use thiserror::Error;

use crate::TypeId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("type {0:?} layout is already fixed and cannot be refixed")]
    AlreadyFixed(TypeId),
    #[error("type {0:?} has negative or inconsistent member offset")]
    InconsistentOffset(TypeId),
    #[error("type {0:?} size is not large enough to hold its fixed members")]
    SizeTooSmall(TypeId),
}
