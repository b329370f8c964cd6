use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use crate::usecase::contracts::ReverseGeocoder;

#[derive(Deserialize, Default)]
struct NominatimAddress {
    house_number: Option<String>,
    road: Option<String>,
    suburb: Option<String>,
    neighbourhood: Option<String>,
    village: Option<String>,
    town: Option<String>,
    city: Option<String>,
}

#[derive(Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
    display_name: Option<String>,
}

#[derive(Clone)]
pub struct NominatimClient {
    client: Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent("Roadside/1.0")
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base_url })
    }
}

fn short_address(data: NominatimResponse) -> Option<String> {
    let addr = data.address.unwrap_or_default();
    let street = match (addr.house_number, addr.road) {
        (Some(n), Some(r)) => Some(format!("{n} {r}")),
        (None, Some(r)) => Some(r),
        _ => None,
    };
    let area = addr
        .suburb
        .or(addr.neighbourhood)
        .or(addr.village)
        .or(addr.town)
        .or(addr.city);

    match (street, area) {
        (Some(s), Some(a)) => Some(format!("{s}, {a}")),
        (Some(s), None) => Some(s),
        (None, Some(a)) => Some(a),
        (None, None) => data
            .display_name
            .map(|s| s.split(',').take(2).collect::<Vec<_>>().join(",").trim().to_string())
            .filter(|s| !s.is_empty()),
    }
}

impl ReverseGeocoder for NominatimClient {
    #[tracing::instrument(skip(self))]
    async fn reverse(&self, lat: f64, lng: f64) -> Option<String> {
        let url = format!(
            "{}/reverse?lat={}&lon={}&format=json&zoom=18",
            self.base_url, lat, lng
        );

        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, lat, lng, "nominatim request failed");
                return None;
            }
        };

        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), lat, lng, "nominatim returned an error status");
            return None;
        }

        let data: NominatimResponse = match resp.json().await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "nominatim response parse failed");
                return None;
            }
        };

        let address = short_address(data);
        tracing::debug!(?address, "reverse geocoded");
        address
    }
}
