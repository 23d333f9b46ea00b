// Streaming market data: shared ticker connection, price cache, user-data stream
pub mod cache;
pub mod market;
pub mod subscription;
pub mod user_stream;

pub use cache::PriceCache;
pub use market::MarketDataFeed;
pub use subscription::{StreamRequest, SubscriptionDelta, SubscriptionSet};
pub use user_stream::{ExecutionReport, UserDataStream};
