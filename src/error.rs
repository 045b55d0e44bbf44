use reqwest::StatusCode;
use std::error::Error;

/// Whether trying the same thing again later might work. Only used to
/// annotate logs; nothing in the relay retries.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

impl IsTransient for reqwest::Error {
    fn is_transient(&self) -> bool {
        if self.is_timeout() || self.is_connect() {
            return true;
        }

        if let Some(status) = self.status() {
            return status.is_transient();
        }

        self.is_request()
            && self.source().map_or(false, |s| {
                s.downcast_ref::<hyper::Error>()
                    .map_or(false, |e| e.is_incomplete_message())
            })
    }
}

impl IsTransient for StatusCode {
    fn is_transient(&self) -> bool {
        *self == StatusCode::TOO_MANY_REQUESTS || self.is_server_error()
    }
}
