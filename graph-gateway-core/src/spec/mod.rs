mod field_type;
mod operation;

pub use field_type::*;
pub use operation::*;
