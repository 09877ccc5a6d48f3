//! Two-screen navigation: capture, then results.

use posecap_core::{CaptureStep, CapturedImage, Review};

/// Where the app is.
#[derive(Debug)]
pub enum Route<I> {
    Capture,
    Results(Vec<CapturedImage<I>>),
}

impl<I> Route<I> {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Capture => "/",
            Self::Results(_) => "/results",
        }
    }
}

/// What the results route shows.
#[derive(Debug)]
pub enum Resolved<I> {
    Show(Review<I>),
    /// The capture set did not pass review; go back to capturing.
    Redirect { to: Route<I>, notice: String },
}

pub const MISSING_IMAGES: &str = "Missing image(s). Please try again.";

/// Entering `/results` requires a complete, ordered capture set.
pub fn resolve_results<I>(captures: Vec<CapturedImage<I>>, steps: &[CaptureStep]) -> Resolved<I> {
    match Review::from_captures(captures, steps) {
        Ok(review) => Resolved::Show(review),
        Err(e) => {
            tracing::warn!(error = %e, "rejecting capture set");
            Resolved::Redirect {
                to: Route::Capture,
                notice: MISSING_IMAGES.to_string(),
            }
        }
    }
}
