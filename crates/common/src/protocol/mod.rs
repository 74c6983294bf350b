// Wire protocol for the huddle-sync.v1 WebSocket/SSE channel.

pub mod ws;
