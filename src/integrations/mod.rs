//! External service integrations.

pub mod providers {
    pub use crate::providers::*;
}

pub mod storage {
    pub use crate::storage::*;
}

pub mod quota {
    pub use crate::quota::*;
}
