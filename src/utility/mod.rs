//! Small helpers shared by the services.
pub mod string_utils;
