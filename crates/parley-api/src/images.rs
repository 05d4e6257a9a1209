use anyhow::{Context, Result, anyhow};

/// A profile picture or attachment arrives as a base64 data URL.
pub fn is_image_data_url(value: &str) -> bool {
    value.starts_with("data:image/")
}

/// Client for the external image-hosting service: accepts an encoded image,
/// returns the durable URL it was stored under.
pub struct ImageHost {
    client: reqwest::Client,
    upload_url: String,
    api_key: String,
}

impl ImageHost {
    pub fn new(upload_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_url,
            api_key,
        }
    }

    pub async fn upload(&self, data_url: &str) -> Result<String> {
        let resp = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "file": data_url }))
            .send()
            .await
            .context("image upload request failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("image host returned {}", resp.status()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .context("image host returned invalid JSON")?;

        body.get("secure_url")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("image host response missing secure_url"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_detection() {
        assert!(is_image_data_url("data:image/png;base64,iVBORw0KGgo="));
        assert!(is_image_data_url("data:image/jpeg;base64,/9j/4AAQ"));
        assert!(!is_image_data_url("data:text/plain;base64,aGk="));
        assert!(!is_image_data_url("https://example.com/cat.png"));
        assert!(!is_image_data_url(""));
    }
}
