pub mod config;
pub mod locate;
pub mod normalize;
pub mod parse;
pub mod pipeline;
pub mod sweep;
pub mod units;

#[cfg(test)]
mod test_support;
