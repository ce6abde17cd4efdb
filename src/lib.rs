//! Cross-crate integration tests for the vmarray workspace live in `tests/`.
