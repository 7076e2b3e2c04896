//! BreadService: BREAD actions over the SQL capability, and payload validation.

mod crud;
mod validation;
pub use crud::{parse_json, BreadService};
pub use validation::RequestValidator;
