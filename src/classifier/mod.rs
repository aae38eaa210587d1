//! Classifier capability boundary
//!
//! The pipeline only knows [`ClassifierPort`]: a conformant 299×299 buffer
//! goes in, a label comes out. Backends must not let one call's outcome depend
//! on earlier calls.

pub mod cached;
#[cfg(feature = "onnx")]
pub mod onnx;

use std::fmt;
use std::sync::Arc;

use crate::error::InferenceError;
use crate::pipeline::adapter::ConformantImage;

pub use cached::CachedClassifier;
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

/// A classifier output reduced to its top label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prediction {
    pub label: String,
}

impl Prediction {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Synchronous image classification, callable from any thread.
pub trait ClassifierPort: Send + Sync {
    fn predict(&self, image: &ConformantImage) -> Result<Prediction, InferenceError>;
}

impl<T: ClassifierPort + ?Sized> ClassifierPort for Arc<T> {
    fn predict(&self, image: &ConformantImage) -> Result<Prediction, InferenceError> {
        (**self).predict(image)
    }
}

impl<T: ClassifierPort + ?Sized> ClassifierPort for Box<T> {
    fn predict(&self, image: &ConformantImage) -> Result<Prediction, InferenceError> {
        (**self).predict(image)
    }
}
