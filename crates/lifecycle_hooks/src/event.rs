/// A hook point. The unit struct is the key passed to [`crate::HookRegistry::on`].
pub trait Event: Send + Sync + 'static {
    /// What handlers receive
    type Context: Clone + Send + 'static;
    /// `()` for observers, [`crate::JobInsertResult`] for interceptors
    type Output: Send + 'static;
}
