pub mod edge_services;
pub mod extractor_services;
pub mod fetch_services;
pub mod stream_services;

pub use extractor_services::DynExtractorService;
pub use fetch_services::DynFetchService;
pub use stream_services::DynStreamsService;
