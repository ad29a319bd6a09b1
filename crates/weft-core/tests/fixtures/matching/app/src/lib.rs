pub mod net;
mod server;

pub fn start() {
    net::Dialer.connect();
}

pub fn send(payload: &[u8]) -> usize {
    payload.len()
}
