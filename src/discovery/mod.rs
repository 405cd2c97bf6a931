mod extractor;

pub use extractor::{extract, DiscoveryConfig, DiscoveryContext};
