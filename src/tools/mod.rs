//! 工具层：搜索、网页读取、URL 注册表与排序、查询去重、Markdown 修复、引用构建、答案校验、代码沙箱

pub mod dedup;
pub mod markdown;
pub mod reader;
pub mod references;
pub mod sandbox;
pub mod search;
pub mod url;
pub mod validator;

pub use dedup::{dedup_queries, SIMILARITY_THRESHOLD};
pub use reader::{HttpReader, JinaReader, PageReader, ReadResult};
pub use references::{build_references, BuiltReferences, MIN_CHUNK_LEN};
pub use sandbox::{CodeRunner, CodeSandbox, ProcessRunner, SandboxSolution};
pub use search::{JinaSearch, SearchProvider, SearchQuery, SearchResponse, SearchResult, SerperSearch};
pub use url::{BoostedSnippet, SearchSnippet};
pub use validator::validate_answer;
