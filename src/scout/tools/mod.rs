// Capabilities offered to the reasoning service
pub mod fixtures;
pub mod outputs;
pub mod scraper;
pub mod test_strategy;

pub use fixtures::{FixtureStore, StoreExpectedAgendasTool};
pub use outputs::OutputTool;
pub use scraper::SiteScraperTool;
pub use test_strategy::TestProposedStrategyTool;
