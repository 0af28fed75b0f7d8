use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One MPU6050 reading as published by the device.
///
/// `timestamp` is assigned by the sensor (milliseconds since epoch) and is
/// stored as-is: no monotonicity, range or uniqueness checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "t")]
    pub timestamp: i64,
    /// ax, ay, az in m/s²
    #[serde(rename = "a")]
    pub accel: [f64; 3],
    /// gx, gy, gz in °/s
    #[serde(rename = "g")]
    pub gyro: [f64; 3],
}

/// Samples delivered together in one message.
pub type SampleBatch = Vec<Sample>;

/// A persisted row of `sensor_data`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredSample {
    pub id: i32,
    pub timestamp: i64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
    pub received_at: Option<DateTime<Utc>>,
}

impl StoredSample {
    pub fn accel_magnitude(&self) -> f64 {
        magnitude(self.ax, self.ay, self.az)
    }

    pub fn gyro_magnitude(&self) -> f64 {
        magnitude(self.gx, self.gy, self.gz)
    }
}

fn magnitude(x: f64, y: f64, z: f64) -> f64 {
    (x * x + y * y + z * z).sqrt()
}

/// Whole-table aggregate, only produced when at least one row exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub count: i64,
    pub latest: i64,
    pub earliest: i64,
}

/// Dashboard response for `/api/v1/latest`
#[derive(Debug, Serialize)]
pub struct LatestResponse {
    pub sample: Option<StoredSample>,
    pub update_interval_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A chart point with derived magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: i64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
    pub accel_magnitude: f64,
    pub gyro_magnitude: f64,
}

impl From<&StoredSample> for SeriesPoint {
    fn from(row: &StoredSample) -> Self {
        Self {
            timestamp: row.timestamp,
            ax: row.ax,
            ay: row.ay,
            az: row.az,
            gx: row.gx,
            gy: row.gy,
            gz: row.gz,
            accel_magnitude: row.accel_magnitude(),
            gyro_magnitude: row.gyro_magnitude(),
        }
    }
}

/// Dashboard response for `/api/v1/series`
#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub days: u32,
    pub data: Vec<SeriesPoint>,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dashboard response for `/api/v1/stats`
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub count: i64,
    pub latest: Option<i64>,
    pub earliest: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(a: [f64; 3], g: [f64; 3]) -> StoredSample {
        StoredSample {
            id: 1,
            timestamp: 1000,
            ax: a[0],
            ay: a[1],
            az: a[2],
            gx: g[0],
            gy: g[1],
            gz: g[2],
            received_at: None,
        }
    }

    #[test]
    fn test_magnitudes() {
        let sample = row([3.0, 4.0, 0.0], [0.0, -6.0, 8.0]);
        assert_eq!(sample.accel_magnitude(), 5.0);
        assert_eq!(sample.gyro_magnitude(), 10.0);

        let point = SeriesPoint::from(&sample);
        assert_eq!(point.timestamp, 1000);
        assert_eq!(point.accel_magnitude, 5.0);
        assert_eq!(point.gyro_magnitude, 10.0);
    }

    #[test]
    fn test_sample_wire_names() {
        let sample: Sample =
            serde_json::from_str(r#"{"t":1000,"a":[1,2,3],"g":[4,5,6]}"#).unwrap();
        assert_eq!(sample.timestamp, 1000);
        assert_eq!(sample.accel, [1.0, 2.0, 3.0]);
        assert_eq!(sample.gyro, [4.0, 5.0, 6.0]);
    }
}
