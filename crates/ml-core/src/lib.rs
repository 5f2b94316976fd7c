//! Hazard classification for captured stills: the verdict model, the JSON
//! extraction heuristic, and the remote vision-model client.

pub mod classifier;
pub mod hazard;

pub use classifier::{
    ClassifierConfig, ClassifyError, DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL,
    HAZARD_PROMPT, HazardClassifierClient,
};
pub use hazard::{HazardAnswer, HazardVerdict, extract_json_object};
