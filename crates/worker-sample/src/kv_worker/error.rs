use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KvError {
    #[error("key {0} holds the wrong kind of value")]
    WrongType(String),
    #[error("value at {0} is not an integer")]
    NotInteger(String),
    #[error("increment overflows value at {0}")]
    Overflow(String),
    #[error("store is full ({capacity} keys)")]
    Full { capacity: usize },
}
