// HTTP routes
pub mod generate;
pub mod health;
pub mod internal;
pub mod jobs;

pub use generate::*;
pub use health::*;
pub use internal::*;
pub use jobs::*;
