pub mod content;
pub mod pipeline;
pub mod request;
pub mod stages;

pub use content::*;
pub use pipeline::*;
pub use request::*;
