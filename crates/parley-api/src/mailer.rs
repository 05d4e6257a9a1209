use serde_json::json;
use tracing::{error, info};

use crate::otp::OTP_TTL_MINUTES;

/// Delivers one-time codes to an email address. Delivery is best-effort:
/// failures are logged, never retried. The resend-on-login path is the only
/// recovery flow.
pub trait Mailer: Send + Sync {
    fn send_otp(&self, to: &str, code: &str);
}

/// Local dev mailer that logs the code instead of sending real email.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_otp(&self, to: &str, code: &str) {
        info!(to_email = %to, code = %code, "otp email send stub");
    }
}

/// Mailer backed by an HTTP mail API. The request runs on a spawned task so
/// signup/login latency never depends on the mail provider.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(endpoint: String, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            from,
        }
    }
}

impl Mailer for HttpMailer {
    fn send_otp(&self, to: &str, code: &str) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();
        let body = json!({
            "from": self.from,
            "to": to,
            "subject": "OTP Verification",
            "text": format!(
                "Your Parley verification code is {}. It is valid for {} minutes. \
                 If you did not request this, please ignore this email.",
                code, OTP_TTL_MINUTES
            ),
        });
        let to = to.to_string();

        tokio::spawn(async move {
            let result = client
                .post(&endpoint)
                .bearer_auth(&api_key)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    info!("OTP email sent to {}", to);
                }
                Ok(resp) => {
                    error!("Mail API returned {} sending OTP to {}", resp.status(), to);
                }
                Err(e) => {
                    error!("Failed to send OTP email to {}: {}", to, e);
                }
            }
        });
    }
}
