pub mod headers;
pub mod mime;
pub mod request;
pub mod response;
pub mod status;

pub use headers::Headers;
pub use request::Request;
pub use response::Response;
pub use status::StatusCode;
