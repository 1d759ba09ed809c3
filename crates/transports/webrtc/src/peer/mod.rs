//! Peer session negotiation
//!
//! Handles the transport engine seam and the offer/answer state machine.

pub mod engine;
pub mod negotiation;

pub use engine::{
    ConnectivityState, TransportEngine, TransportEngineFactory, WebRtcEngine, WebRtcEngineFactory,
};
pub use negotiation::{
    ConnectivityObserver, ConnectivitySubscription, NegotiationEngine, NegotiationState,
};
