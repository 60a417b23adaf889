use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    pub status: String,
    pub keys: usize,
}

impl Health {
    pub fn ok(keys: usize) -> Self {
        Self { status: "ok".into(), keys }
    }
}
