//! Request-id propagation for log correlation.

use http::Request;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

/// Assigns a UUID v4 request id to every inbound request.
#[derive(Clone, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        id.parse().ok().map(RequestId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        let mut maker = UuidRequestId;
        let request = Request::builder().body(()).expect("request");
        let a = maker.make_request_id(&request).expect("id");
        let b = maker.make_request_id(&request).expect("id");
        assert_ne!(a.header_value(), b.header_value());
    }
}
