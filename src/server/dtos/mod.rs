pub mod health_dto;
pub mod proxy_dto;
pub mod source_dto;
pub mod stream_dto;
