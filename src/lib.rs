//! Peer-to-peer chess: rules engine, game session, automated opponent, the
//! relay server and the client side of the relay and peer channel.

pub mod controller;
pub mod engine;
pub mod error;
pub mod game;
pub mod models;
pub mod net;
pub mod routes;
pub mod websocket;
