//! Enrollment workflow integration tests

mod bundle_test;
mod protocol_test;
mod resume_test;
