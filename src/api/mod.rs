// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

pub mod session {
    pub use crate::session::*;
}

pub mod stream {
    pub use crate::stream::*;
}
