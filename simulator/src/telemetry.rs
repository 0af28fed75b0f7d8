use serde::{Deserialize, Serialize};

/// One MPU6050 reading in the device wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub t: i64,
    pub a: [f64; 3],
    pub g: [f64; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub samples: Vec<Sample>,
}
