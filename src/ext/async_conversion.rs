/// Fallible conversion which has to await I/O, e.g. decoding a record stored on disk.
///
/// # Examples
///
/// ```rust,ignore
/// use std::path::Path;
///
/// struct Blob(Vec<u8>);
///
/// impl AsyncTryFrom<&Path> for Blob {
///     type Error = std::io::Error;
///
///     async fn async_try_from(path: &Path) -> Result<Self, Self::Error> {
///         Ok(Blob(compio::fs::read(path).await?))
///     }
/// }
/// ```
pub trait AsyncTryFrom<T>: Sized {
    type Error;

    async fn async_try_from(value: T) -> Result<Self, Self::Error>;
}

/// Counterpart of [`AsyncTryFrom`], implemented for every type it covers.
pub trait AsyncTryInto<T> {
    type Error;

    async fn async_try_into(self) -> Result<T, Self::Error>;
}

impl<T, U> AsyncTryInto<U> for T
where
    U: AsyncTryFrom<T>,
{
    type Error = U::Error;

    async fn async_try_into(self) -> Result<U, Self::Error> {
        U::async_try_from(self).await
    }
}
