use anyhow::{anyhow, Result};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Response,
};
use std::time::Duration;

#[allow(async_fn_in_trait)]
pub trait FromResponse: Sized {
    async fn from_response(response: Response) -> Result<Self>;
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status().as_u16();
    if !(200..=299).contains(&status) {
        let msg = response.text().await.unwrap_or_default();
        return Err(anyhow!("Request error (status: {}, body: {})", status, msg));
    }
    Ok(response)
}

impl FromResponse for Vec<u8> {
    async fn from_response(response: Response) -> Result<Self> {
        Ok(check_status(response).await?.bytes().await?.to_vec())
    }
}

impl FromResponse for String {
    async fn from_response(response: Response) -> Result<Self> {
        Ok(check_status(response).await?.text().await?)
    }
}

pub async fn get<T: FromResponse>(
    url: &str,
    headers: Option<Vec<(String, String)>>,
    timeout: Option<Duration>,
) -> Result<T> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    let client = builder.build()?;

    let mut request = client.get(url);
    if let Some(headers) = headers {
        request = request.headers(convert_headers(headers)?);
    }

    let response = request.send().await?;
    T::from_response(response).await
}

fn convert_headers(headers: Vec<(String, String)>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name =
            HeaderName::from_bytes(key.as_bytes()).map_err(|_| anyhow!("Invalid header name"))?;
        let value = HeaderValue::from_str(&value).map_err(|_| anyhow!("Invalid header value"))?;
        map.insert(name, value);
    }
    Ok(map)
}
