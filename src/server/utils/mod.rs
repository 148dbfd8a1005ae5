pub mod content_encoding;
pub mod manifest_rewriter;
pub mod proxy_routes;
pub mod reference_codec;

pub use content_encoding::ContentEncoding;
pub use manifest_rewriter::{ManifestRewriter, RewriteError};
pub use proxy_routes::{ProxyRoute, ProxyRoutes};
pub use reference_codec::{DecodeError, OpaqueReference};
