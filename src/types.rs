use crate::error::SynthError;

pub type Result<T> = std::result::Result<T, SynthError>;
