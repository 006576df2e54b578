//! Engine-neutral schema model, row values, and capability traits.

pub mod schema;
pub mod traits;
pub mod value;
