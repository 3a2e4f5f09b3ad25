pub mod deep_filter;
pub mod erb;
pub mod features;
pub mod post_filter;
pub mod stft;
pub mod utils;

pub use deep_filter::{apply_erb_mask, DeepFilter};
pub use erb::ErbFilterbank;
pub use features::FeatureExtractor;
pub use post_filter::PostConditioner;
pub use stft::StftEngine;
