//! Background removal adapter abstraction

use crate::error::Result;

/// A routine that turns an image into the same image without its background
///
/// Implementations are synchronous and may take seconds; callers run them on
/// a blocking thread. The output may be any encoding the `image` crate reads,
/// it is normalised to PNG before storage.
pub trait BackgroundRemover: Send + Sync {
    /// Remove the background from the encoded image in `input`
    ///
    /// # Errors
    /// - `ServerError::Processing` for undecodable or unsupported input
    /// - `ServerError::Processing` when the underlying model or program fails
    fn remove_background(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

impl<T: BackgroundRemover + ?Sized> BackgroundRemover for std::sync::Arc<T> {
    fn remove_background(&self, input: &[u8]) -> Result<Vec<u8>> {
        (**self).remove_background(input)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use std::sync::Arc;

    struct Echo;

    impl BackgroundRemover for Echo {
        fn remove_background(&self, input: &[u8]) -> Result<Vec<u8>> {
            if input.is_empty() {
                return Err(ServerError::processing("empty input"));
            }
            Ok(input.to_vec())
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    #[test]
    fn test_trait_object_through_arc() {
        let remover: Arc<dyn BackgroundRemover> = Arc::new(Echo);
        assert_eq!(remover.remove_background(b"abc").unwrap(), b"abc");
        assert_eq!(remover.name(), "echo");
        assert!(remover.remove_background(b"").is_err());
    }
}
