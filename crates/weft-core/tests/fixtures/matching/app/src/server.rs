pub fn handle_get() -> u16 {
    200
}

pub fn handle_post() -> u16 {
    201
}
