//! Validated generation parameters.
//!
//! [`GenerationParameters`] is built once per request by merging
//! [`ParamOverrides`] onto configured defaults. Out-of-range values are
//! rejected, never clamped.

/// Parameter validation error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("max_new_tokens must be a positive integer (got {0})")]
    MaxNewTokens(i64),
    #[error("temperature must be a finite number >= 0 (got {0})")]
    Temperature(f64),
    #[error("top_p must be in (0, 1] (got {0})")]
    TopP(f64),
    #[error("stop sequences must not be empty strings")]
    EmptyStopSequence,
}

/// How a single generation call behaves.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParameters {
    max_new_tokens: usize,
    temperature: f32,
    top_p: f32,
    stop_sequences: Vec<String>,
}

impl GenerationParameters {
    pub const DEFAULT_MAX_NEW_TOKENS: usize = 256;
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;
    pub const DEFAULT_TOP_P: f32 = 0.9;

    /// Validate and build parameters.
    ///
    /// An empty `stop_sequences` list means "use the runtime's end-of-sequence
    /// markers".
    pub fn new(
        max_new_tokens: i64,
        temperature: f64,
        top_p: f64,
        stop_sequences: Vec<String>,
    ) -> Result<Self, ParamError> {
        if max_new_tokens <= 0 {
            return Err(ParamError::MaxNewTokens(max_new_tokens));
        }
        let max_new_tokens =
            usize::try_from(max_new_tokens).map_err(|_| ParamError::MaxNewTokens(max_new_tokens))?;

        // Both the given f64 and the stored f32 must satisfy the bounds.
        let narrowed_temperature = temperature as f32;
        if !temperature.is_finite() || temperature < 0.0 || !narrowed_temperature.is_finite() {
            return Err(ParamError::Temperature(temperature));
        }
        let narrowed_top_p = top_p as f32;
        if !top_p.is_finite() || top_p <= 0.0 || top_p > 1.0 || narrowed_top_p <= 0.0 {
            return Err(ParamError::TopP(top_p));
        }
        if stop_sequences.iter().any(|s| s.is_empty()) {
            return Err(ParamError::EmptyStopSequence);
        }

        Ok(Self {
            max_new_tokens,
            temperature: narrowed_temperature,
            top_p: narrowed_top_p,
            stop_sequences,
        })
    }

    /// Merge request overrides onto `defaults`; absent fields take the default.
    pub fn resolve(
        overrides: &ParamOverrides,
        defaults: &GenerationParameters,
    ) -> Result<Self, ParamError> {
        Self::new(
            overrides
                .max_new_tokens
                .unwrap_or(defaults.max_new_tokens as i64),
            overrides
                .temperature
                .unwrap_or(f64::from(defaults.temperature)),
            overrides.top_p.unwrap_or(f64::from(defaults.top_p)),
            overrides
                .stop_sequences
                .clone()
                .unwrap_or_else(|| defaults.stop_sequences.clone()),
        )
    }

    pub fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn top_p(&self) -> f32 {
        self.top_p
    }

    pub fn stop_sequences(&self) -> &[String] {
        &self.stop_sequences
    }

    /// Temperature 0 selects greedy decoding.
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            max_new_tokens: Self::DEFAULT_MAX_NEW_TOKENS,
            temperature: Self::DEFAULT_TEMPERATURE,
            top_p: Self::DEFAULT_TOP_P,
            stop_sequences: Vec::new(),
        }
    }
}

/// Per-request values supplied by the caller. `None` falls back to defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamOverrides {
    pub max_new_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Option<Vec<String>>,
}
