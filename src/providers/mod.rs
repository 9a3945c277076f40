pub mod caching;
pub mod universalis;
pub mod util;

pub use caching::CachingMarketProvider;
pub use universalis::UniversalisProvider;
