mod common;
mod forge;
mod handshake;
mod hwm;
mod sse;
mod transport;
mod visibility;
mod workflow;
