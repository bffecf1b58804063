//! Workspace-level integration tests (`tests/tests/*.rs`); no library code
//! of its own. Exercises whole-stack behavior across crate boundaries that
//! no single crate's own test module can see.
