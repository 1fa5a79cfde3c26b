//! Small shared helpers.

mod uuid_utils;

pub use uuid_utils::{generate_correlation_id, generate_uuid};
