pub struct Dialer;

pub struct Conn {
    pub id: u32,
}

impl Dialer {
    pub fn connect(&self) -> Conn {
        Conn { id: 1 }
    }
}
