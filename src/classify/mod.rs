//! 分类层：Judgment 模型、防御式 JSON 提取、带 TTL 的缓存、分类器

pub mod cache;
pub mod classifier;
pub mod extract;
pub mod judgment;

pub use cache::ClassificationCache;
pub use classifier::{ClassifierConfig, IntentClassifier};
pub use extract::extract_json_object;
pub use judgment::{Judgment, GENERIC_KIND};
