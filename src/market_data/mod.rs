pub mod candle_store;
pub mod kline_stream;
pub mod orderbook;

pub use candle_store::CandleStore;
pub use orderbook::{OrderBookManager, OrderBookSnapshot};
