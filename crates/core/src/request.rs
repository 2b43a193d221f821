//! Generation request constants, clamping, and validation.

use crate::bitmap::Bitmap;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits and defaults
// ---------------------------------------------------------------------------

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 2000;

/// Fewest images a request may ask for.
pub const MIN_IMAGES: u32 = 1;

/// Most images a request may ask for (one batched sampler run).
pub const MAX_IMAGES: u32 = 4;

/// Influence used when the caller supplies a non-finite value.
pub const DEFAULT_INFLUENCE: f64 = 0.65;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Immutable input for one `generate` call.
///
/// Influence and image count are stored as given and clamped on read, so a
/// caller can never push an out-of-domain value into the workflow.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    prompt: String,
    style: String,
    influence: f64,
    num_images: u32,
    init_image: Bitmap,
    reference_image: Option<Bitmap>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, init_image: Bitmap) -> Self {
        Self {
            prompt: prompt.into(),
            style: String::new(),
            influence: DEFAULT_INFLUENCE,
            num_images: MIN_IMAGES,
            init_image,
            reference_image: None,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_influence(mut self, influence: f64) -> Self {
        self.influence = influence;
        self
    }

    pub fn with_num_images(mut self, num_images: u32) -> Self {
        self.num_images = num_images;
        self
    }

    pub fn with_reference_image(mut self, reference: Bitmap) -> Self {
        self.reference_image = Some(reference);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn style(&self) -> &str {
        &self.style
    }

    /// Influence weight clamped to `[0, 1]`.
    pub fn influence(&self) -> f64 {
        clamp_influence(self.influence)
    }

    /// Requested image count clamped to `[MIN_IMAGES, MAX_IMAGES]`.
    pub fn num_images(&self) -> u32 {
        self.num_images.clamp(MIN_IMAGES, MAX_IMAGES)
    }

    pub fn init_image(&self) -> &Bitmap {
        &self.init_image
    }

    pub fn reference_image(&self) -> Option<&Bitmap> {
        self.reference_image.as_ref()
    }

    /// Check that the request may be dispatched.
    ///
    /// Runs before any network call; an empty prompt never reaches the engine.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_prompt(&self.prompt)
    }
}

/// Clamp an influence weight into `[0, 1]`, mapping NaN/infinite input to
/// [`DEFAULT_INFLUENCE`].
pub fn clamp_influence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        DEFAULT_INFLUENCE
    }
}

/// Validate prompt text: non-blank and at most [`MAX_PROMPT_LENGTH`] characters.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation(
            "Prompt must not be empty".to_string(),
        ));
    }
    let length = prompt.chars().count();
    if length > MAX_PROMPT_LENGTH {
        return Err(CoreError::Validation(format!(
            "Prompt must be at most {MAX_PROMPT_LENGTH} characters, got {length}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
