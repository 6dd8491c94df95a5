mod cache;
pub mod engine;
pub mod intermediate;
pub mod partial;
pub mod post;


pub use cache::{request_key, CacheControl, ResultCache};
pub use engine::Analyzer;
pub use intermediate::{merge_into, merge_user_results, IntermediateUserResult};
pub use partial::{PartialCache, RevisionMetadata};
pub use post::{create_analyze_result, post_process};
