//! Lazily constructed, reused model handle

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use super::{ClassifierPort, Prediction};
use crate::error::InferenceError;
use crate::pipeline::adapter::ConformantImage;

type Factory<M> = Box<dyn Fn() -> Result<M, InferenceError> + Send + Sync>;

/// Builds the model on first use and keeps it for every later call.
///
/// A failed construction is reported as that call's inference failure and
/// attempted again on the next call.
pub struct CachedClassifier<M> {
    factory: Factory<M>,
    model: OnceCell<M>,
}

impl<M: ClassifierPort> CachedClassifier<M> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<M, InferenceError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            model: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    fn model(&self) -> Result<&M, InferenceError> {
        self.model.get_or_try_init(|| {
            debug!("Constructing classifier model");
            let model = (self.factory)()?;
            info!("Classifier model ready");
            Ok(model)
        })
    }
}

impl<M: ClassifierPort> ClassifierPort for CachedClassifier<M> {
    fn predict(&self, image: &ConformantImage) -> Result<Prediction, InferenceError> {
        self.model()?.predict(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::adapter::{adapt, ImageSource};
    use image::{DynamicImage, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed(&'static str);

    impl ClassifierPort for Fixed {
        fn predict(&self, _image: &ConformantImage) -> Result<Prediction, InferenceError> {
            Ok(Prediction::new(self.0))
        }
    }

    fn sample() -> ConformantImage {
        let bitmap = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        adapt(ImageSource::Bitmap(&bitmap)).unwrap()
    }

    #[test]
    fn model_is_built_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let classifier = CachedClassifier::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Fixed("cat"))
        });
        assert!(!classifier.is_loaded());

        let image = sample();
        for _ in 0..3 {
            assert_eq!(classifier.predict(&image).unwrap().label, "cat");
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(classifier.is_loaded());
    }

    #[test]
    fn failed_build_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let classifier = CachedClassifier::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(InferenceError::ModelLoad("missing weights".into()))
            } else {
                Ok(Fixed("dog"))
            }
        });

        let image = sample();
        assert!(matches!(
            classifier.predict(&image),
            Err(InferenceError::ModelLoad(_))
        ));
        assert_eq!(classifier.predict(&image).unwrap().label, "dog");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
