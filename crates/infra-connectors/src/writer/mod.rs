// Item writers

pub mod discard;
pub mod elasticsearch;
pub mod jsonl;

pub use discard::DiscardWriter;
pub use elasticsearch::ElasticsearchWriter;
pub use jsonl::JsonlWriter;
