//! View side of the mirror: the component tree and the change trail it
//! produces.

mod component;
mod context;
mod error;

pub use component::ViewComponent;
pub use context::{ComponentContext, MessageListener};
pub use error::StructuralViolation;
