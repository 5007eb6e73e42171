//! Korea Meteorological Administration lookups: ultra-short-range forecast by
//! grid cell and daily ASOS observations by station.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{ensure_success, ClientError, ClientResult};

const FORECAST_URL: &str =
    "http://apis.data.go.kr/1360000/VilageFcstInfoService_2.0/getUltraSrtFcst";
const ASOS_URL: &str = "http://apis.data.go.kr/1360000/AsosDalyInfoService/getWthrDataList";

const DEFAULT_STATION: u32 = 108;

/// (station id, latitude, longitude) of the ASOS stations used for history.
const STATIONS: &[(u32, f64, f64)] = &[
    (108, 37.5714, 126.9658), // Seoul
    (112, 37.4527, 126.7073), // Incheon
    (119, 37.2574, 127.0219), // Suwon
    (98, 37.9026, 127.0607),  // Dongducheon
    (101, 37.8858, 127.7306), // Chuncheon
    (105, 37.7515, 128.8910), // Gangneung
    (131, 36.6392, 127.4407), // Cheongju
    (133, 36.3720, 127.3721), // Daejeon
    (143, 35.8779, 128.6014), // Daegu
    (146, 35.8215, 127.1550), // Jeonju
    (156, 35.1729, 126.8916), // Gwangju
    (159, 35.1047, 129.0324), // Busan
    (184, 33.5141, 126.5297), // Jeju
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridCell {
    pub nx: i32,
    pub ny: i32,
}

/// Lambert conformal conic projection onto the 5km forecast grid.
pub fn to_grid(latitude: f64, longitude: f64) -> GridCell {
    const RE: f64 = 6371.00877;
    const GRID: f64 = 5.0;
    const SLAT1: f64 = 30.0;
    const SLAT2: f64 = 60.0;
    const OLON: f64 = 126.0;
    const OLAT: f64 = 38.0;
    const XO: f64 = 43.0;
    const YO: f64 = 136.0;

    let degrad = std::f64::consts::PI / 180.0;
    let re = RE / GRID;
    let slat1 = SLAT1 * degrad;
    let slat2 = SLAT2 * degrad;
    let olon = OLON * degrad;
    let olat = OLAT * degrad;
    let quarter = std::f64::consts::FRAC_PI_4;

    let sn = ((slat1.cos() / slat2.cos()).ln())
        / ((quarter + slat2 * 0.5).tan() / (quarter + slat1 * 0.5).tan()).ln();
    let sf = (quarter + slat1 * 0.5).tan().powf(sn) * slat1.cos() / sn;
    let ro = re * sf / (quarter + olat * 0.5).tan().powf(sn);

    let ra = re * sf / (quarter + latitude * degrad * 0.5).tan().powf(sn);
    let mut theta = longitude * degrad - olon;
    if theta > std::f64::consts::PI {
        theta -= 2.0 * std::f64::consts::PI;
    }
    if theta < -std::f64::consts::PI {
        theta += 2.0 * std::f64::consts::PI;
    }
    theta *= sn;

    GridCell {
        nx: (ra * theta.sin() + XO + 0.5).floor() as i32,
        ny: (ro - ra * theta.cos() + YO + 0.5).floor() as i32,
    }
}

/// Closest station by squared coordinate distance.
pub fn nearest_station(latitude: f64, longitude: f64) -> u32 {
    STATIONS
        .iter()
        .map(|(id, lat, lon)| {
            let distance = (lat - latitude).powi(2) + (lon - longitude).powi(2);
            (*id, distance)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
        .unwrap_or(DEFAULT_STATION)
}

/// The forecast is published at HH30 and available from HH45.
pub fn forecast_base(now_kst: NaiveDateTime) -> (String, String) {
    let base = if now_kst.minute() < 45 {
        now_kst - Duration::hours(1)
    } else {
        now_kst
    };
    (
        base.format("%Y%m%d").to_string(),
        format!("{:02}30", base.hour()),
    )
}

pub fn describe_forecast(pty: Option<&str>, sky: Option<&str>) -> &'static str {
    match pty.unwrap_or("0") {
        "1" | "5" => return "비",
        "2" | "6" => return "진눈깨비",
        "3" | "7" => return "눈",
        "0" => {}
        _ => return "흐림",
    }
    match sky {
        Some("3") => "구름많음",
        Some("4") => "흐림",
        _ => "맑음",
    }
}

pub fn describe_observation(sum_rain: Option<&str>, avg_cloud: Option<&str>) -> &'static str {
    let rained = sum_rain
        .map(str::trim)
        .is_some_and(|value| !value.is_empty() && value != "0.0" && value != "0");
    if rained {
        return "비";
    }
    let cloud = avg_cloud
        .and_then(|value| value.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    if cloud >= 6.0 {
        "흐림"
    } else if cloud >= 3.0 {
        "구름많음"
    } else {
        "맑음"
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync {
    async fn current_weather(&self, cell: GridCell) -> ClientResult<String>;

    async fn past_weather(&self, date: NaiveDate, latitude: f64, longitude: f64)
        -> ClientResult<String>;
}

pub struct KmaWeatherClient {
    client: Client,
    forecast_key: String,
    asos_key: String,
}

impl KmaWeatherClient {
    pub fn new(client: Client, forecast_key: String, asos_key: String) -> Self {
        Self {
            client,
            forecast_key,
            asos_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KmaEnvelope<T> {
    response: KmaResponse<T>,
}

#[derive(Debug, Deserialize)]
struct KmaResponse<T> {
    body: Option<KmaBody<T>>,
}

#[derive(Debug, Deserialize)]
struct KmaBody<T> {
    items: KmaItems<T>,
}

#[derive(Debug, Deserialize)]
struct KmaItems<T> {
    #[serde(default = "Vec::new")]
    item: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastItem {
    category: String,
    fcst_value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObservationItem {
    sum_rn: Option<String>,
    avg_tca: Option<String>,
}

fn kma_items<T>(envelope: KmaEnvelope<T>) -> ClientResult<Vec<T>> {
    envelope
        .response
        .body
        .map(|body| body.items.item)
        .ok_or_else(|| ClientError::payload("kma", "response body missing"))
}

#[async_trait]
impl WeatherProvider for KmaWeatherClient {
    async fn current_weather(&self, cell: GridCell) -> ClientResult<String> {
        // KST, UTC+9
        let now = (Utc::now() + Duration::hours(9)).naive_utc();
        let (base_date, base_time) = forecast_base(now);
        let nx = cell.nx.to_string();
        let ny = cell.ny.to_string();

        let response = self
            .client
            .get(FORECAST_URL)
            .query(&[
                ("serviceKey", self.forecast_key.as_str()),
                ("pageNo", "1"),
                ("numOfRows", "60"),
                ("dataType", "JSON"),
                ("base_date", base_date.as_str()),
                ("base_time", base_time.as_str()),
                ("nx", nx.as_str()),
                ("ny", ny.as_str()),
            ])
            .send()
            .await?;
        let response = ensure_success("kma", response).await?;
        let envelope: KmaEnvelope<ForecastItem> = response
            .json()
            .await
            .map_err(|err| ClientError::payload("kma", err.to_string()))?;
        let items = kma_items(envelope)?;

        let value_of = |category: &str| {
            items
                .iter()
                .find(|item| item.category == category)
                .map(|item| item.fcst_value.as_str())
        };
        let label = describe_forecast(value_of("PTY"), value_of("SKY"));
        debug!(nx = cell.nx, ny = cell.ny, label, "resolved forecast weather");
        Ok(label.to_string())
    }

    async fn past_weather(
        &self,
        date: NaiveDate,
        latitude: f64,
        longitude: f64,
    ) -> ClientResult<String> {
        let station = nearest_station(latitude, longitude);
        let day = date.format("%Y%m%d").to_string();
        let station_id = station.to_string();

        let response = self
            .client
            .get(ASOS_URL)
            .query(&[
                ("serviceKey", self.asos_key.as_str()),
                ("pageNo", "1"),
                ("numOfRows", "10"),
                ("dataType", "JSON"),
                ("dataCd", "ASOS"),
                ("dateCd", "DAY"),
                ("startDt", day.as_str()),
                ("endDt", day.as_str()),
                ("stnIds", station_id.as_str()),
            ])
            .send()
            .await?;
        let response = ensure_success("kma", response).await?;
        let envelope: KmaEnvelope<ObservationItem> = response
            .json()
            .await
            .map_err(|err| ClientError::payload("kma", err.to_string()))?;
        let observation = kma_items(envelope)?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::payload("kma", "no observation for date"))?;

        let label =
            describe_observation(observation.sum_rn.as_deref(), observation.avg_tca.as_deref());
        debug!(station, %date, label, "resolved observed weather");
        Ok(label.to_string())
    }
}
