pub mod fetcher;
pub mod headers;
pub mod postprocess;
pub mod proxy;

pub use fetcher::{ReqwestFetcher, ReqwestSession};
pub use headers::RotatingHeaderGenerator;
pub use postprocess::{JsonPostProcessor, MarkdownPostProcessor};
pub use proxy::{EnvProxyResolver, ProxyTable};
