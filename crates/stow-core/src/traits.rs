use stow_types::Guid;

/// A shared wrapper around an open primitive handle.
///
/// Wrappers are reference counted; the [`crate::cache::HandleCache`] only
/// holds weak references to them. Disposal releases the primitive handle
/// early, even while strong references remain:
/// - `dispose` is idempotent.
/// - After `dispose`, every operation through the handle fails with
///   disposed-access, and caches treat the entry as dead.
pub trait CachedHandle: Send + Sync {
    /// The GUID the handle is cached under.
    fn id(&self) -> Guid;

    /// Release the primitive handle.
    fn dispose(&self);

    /// Returns `true` once [`CachedHandle::dispose`] has run.
    fn is_disposed(&self) -> bool;
}
