pub mod headers;
pub mod request;
pub mod response;
pub mod sink;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;
pub use sink::Sink;
