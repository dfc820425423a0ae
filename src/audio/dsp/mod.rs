pub mod biquad;

pub use biquad::FilterChain;
