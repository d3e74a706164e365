//! Wire types shared by the PicIt server, gateway and client.

pub mod api;
pub mod events;
pub mod models;
