//! Screen wake-lock collaborator.

use futures_util::future::BoxFuture;

use crate::audio::AcquisitionError;

pub trait WakeLockHandle: Send + Sync {
    /// False once the platform released the lock (e.g. the page was hidden).
    fn is_held(&self) -> bool;
    fn release(&self);
}

pub trait WakeLockProvider: Send + Sync {
    fn request(&self) -> BoxFuture<'_, Result<Box<dyn WakeLockHandle>, AcquisitionError>>;
}
