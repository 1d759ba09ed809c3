//! Out-of-band SDP exchange
//!
//! The browser sends its offer in an HTTP request header and receives the
//! answer in the response body, both in the encoding of [`codec`].

pub mod codec;
pub mod http;

pub use codec::{decode, encode, SdpType, SessionDescription};
pub use http::{SignalingServer, OFFER_HEADER};
