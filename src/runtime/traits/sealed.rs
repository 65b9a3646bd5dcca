// ABOUTME: Sealed trait pattern for engine traits.
// ABOUTME: Prevents implementations outside this crate.

/// Sealed trait to prevent external implementations.
///
/// Only the engines shipped in this crate implement it.
pub trait Sealed {}
