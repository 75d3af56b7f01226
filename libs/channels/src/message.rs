use std::fmt::Debug;

/// Bound for anything a channel can carry
pub trait Message: Clone + Debug + Send + Sync + 'static {}

impl<T> Message for T where T: Clone + Debug + Send + Sync + 'static {}

/// Computes the key used to pair a request with its response
///
/// `None` (or an empty key) means the message cannot be correlated.
pub trait Correlator<M>: Send + Sync {
    fn compute_identifier(&self, message: &M) -> Option<String>;
}

impl<M, F> Correlator<M> for F
where
    F: Fn(&M) -> Option<String> + Send + Sync,
{
    fn compute_identifier(&self, message: &M) -> Option<String> {
        self(message)
    }
}

/// Apply `correlator` and discard empty keys
pub(crate) fn correlation_key<M>(correlator: &dyn Correlator<M>, message: &M) -> Option<String> {
    correlator
        .compute_identifier(message)
        .filter(|key| !key.is_empty())
}
