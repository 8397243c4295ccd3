//! Protocol types shared by the client and the server side.
//!
//! - [`RequestAssembler`]: collects the events of a [`crate::parser::RequestParser`] into
//!   `http::Request<Bytes>` values
//! - [`encode_response`]: serializes an `http::Response<Bytes>` for the wire
//! - [`ParseError`] and [`SocketError`]: the error types of the crate

mod error;
pub use error::ParseError;
pub use error::RequestError;
pub use error::SocketError;

mod request;
pub use request::RequestAssembler;
pub use request::split_header;

mod response;
pub use response::encode_response;
