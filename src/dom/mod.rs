//! Document model, XPath selection and structural rewriting

pub mod document;
pub mod transform;
pub mod xpath;

pub use document::{Document, NodeId};
pub use transform::{relocate, strip, MoveRule, Position};
pub use xpath::{Hit, XPath};
