pub mod gemini;

pub use gemini::{analyze_image, generate_image, GeneratedImage};
