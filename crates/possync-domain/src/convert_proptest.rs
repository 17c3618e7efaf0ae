//! Property-based tests for the type conversion layer.
