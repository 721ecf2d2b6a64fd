// Domain-layer modules and shared errors/models
pub mod models {
    pub use crate::models::*;
}

pub mod processor {
    pub use crate::processor::*;
}

pub mod status_trail {
    pub use crate::status_trail::*;
}

pub mod validator {
    pub use crate::validator::*;
}

pub mod errors {
    pub use crate::errors::*;
}
