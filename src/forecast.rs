//! Demo weather forecast served by both services

use chrono::{Days, Local, NaiveDate};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Summaries a forecast is drawn from
pub const SUMMARIES: [&str; 10] = [
    "Freezing",
    "Bracing",
    "Chilly",
    "Cool",
    "Mild",
    "Warm",
    "Balmy",
    "Hot",
    "Sweltering",
    "Scorching",
];

/// Number of days returned by `/weatherforecast`
pub const FORECAST_DAYS: u64 = 5;

/// One day of forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherForecast {
    /// Forecast date
    pub date: NaiveDate,
    /// Temperature in Celsius
    pub temperature_c: i32,
    /// Temperature in Fahrenheit, derived from `temperature_c`
    pub temperature_f: i32,
    /// Free-text summary
    pub summary: Option<String>,
}

impl WeatherForecast {
    /// Build a forecast entry, deriving Fahrenheit
    #[must_use]
    pub fn new(date: NaiveDate, temperature_c: i32, summary: Option<String>) -> Self {
        Self {
            date,
            temperature_c,
            temperature_f: to_fahrenheit(temperature_c),
            summary,
        }
    }
}

/// Approximate Celsius to Fahrenheit conversion, truncating toward zero
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn to_fahrenheit(celsius: i32) -> i32 {
    32 + (f64::from(celsius) / 0.5556) as i32
}

/// Random forecast for the next [`FORECAST_DAYS`] days
#[must_use]
pub fn generate() -> Vec<WeatherForecast> {
    let mut rng = rand::rng();
    let today = Local::now().date_naive();

    (1..=FORECAST_DAYS)
        .map(|offset| {
            let summary = SUMMARIES[rng.random_range(0..SUMMARIES.len())];
            WeatherForecast::new(
                today + Days::new(offset),
                rng.random_range(-20..55),
                Some(summary.to_string()),
            )
        })
        .collect()
}
