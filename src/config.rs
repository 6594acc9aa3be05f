use envconfig::Envconfig;

use crate::rules::Policy;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub db_url: String,
    #[envconfig(from = "PORT", default = "8080")]
    pub port: u16,
    #[envconfig(from = "JWT_SECRET")]
    pub jwt_secret: String,
    #[envconfig(from = "STATIC_DIR", default = "assets")]
    pub static_dir: String,

    #[envconfig(from = "CAMPUS_EMAIL_DOMAIN", default = "snuchennai.edu.in")]
    pub campus_email_domain: String,
    #[envconfig(from = "OFFER_WINDOW_SECS", default = "3600")]
    pub offer_window_secs: u64,
    #[envconfig(from = "SWEEP_INTERVAL_SECS", default = "60")]
    pub sweep_interval_secs: u64,
    #[envconfig(from = "MAX_EVENT_HOURS", default = "12")]
    pub max_event_hours: u64,
    #[envconfig(from = "LEADERBOARD_WINDOW_DAYS", default = "180")]
    pub leaderboard_window_days: u64,

    #[envconfig(from = "RAZORPAY_BASE_URL", default = "https://api.razorpay.com/v1")]
    pub razorpay_base_url: String,
    #[envconfig(from = "RAZORPAY_KEY_ID")]
    pub razorpay_key_id: Option<String>,
    #[envconfig(from = "RAZORPAY_KEY_SECRET")]
    pub razorpay_key_secret: Option<String>,

    #[envconfig(from = "OLLAMA_HOST", default = "http://localhost:11434")]
    pub ollama_host: String,
    #[envconfig(from = "OLLAMA_MODEL", default = "llava")]
    pub ollama_model: String,

    #[envconfig(from = "SMTP_RELAY", default = "smtp.gmail.com")]
    pub smtp_relay: String,
    #[envconfig(from = "EMAIL_USERNAME")]
    pub email_username: Option<String>,
    #[envconfig(from = "EMAIL_PASSWORD")]
    pub email_password: Option<String>,
}

impl Config {
    pub fn policy(&self) -> anyhow::Result<Policy> {
        Policy::new(
            &self.campus_email_domain,
            self.offer_window_secs,
            self.max_event_hours,
            self.leaderboard_window_days,
        )
    }

    pub fn razorpay_credentials(&self) -> Option<(&str, &str)> {
        match (&self.razorpay_key_id, &self.razorpay_key_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.as_str(), secret.as_str()))
            }
            _ => None,
        }
    }

    pub fn email_credentials(&self) -> Option<(&str, &str)> {
        match (&self.email_username, &self.email_password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user.as_str(), password.as_str()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::init_from_hashmap(&vars(&[
            ("DATABASE_URL", "postgres://localhost/events"),
            ("JWT_SECRET", "c2VjcmV0"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.offer_window_secs, 3600);
        assert_eq!(config.ollama_model, "llava");
        assert_eq!(config.campus_email_domain, "snuchennai.edu.in");
        assert!(config.razorpay_credentials().is_none());
        assert!(config.email_credentials().is_none());
    }

    #[test]
    fn integrations_need_both_halves_of_their_credentials() {
        let config = Config::init_from_hashmap(&vars(&[
            ("DATABASE_URL", "postgres://localhost/events"),
            ("JWT_SECRET", "c2VjcmV0"),
            ("RAZORPAY_KEY_ID", "rzp_test_123"),
            ("EMAIL_USERNAME", "events@snuchennai.edu.in"),
            ("EMAIL_PASSWORD", "app-password"),
        ]))
        .unwrap();

        assert!(config.razorpay_credentials().is_none());
        assert_eq!(
            config.email_credentials(),
            Some(("events@snuchennai.edu.in", "app-password"))
        );
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(Config::init_from_hashmap(&vars(&[("JWT_SECRET", "c2VjcmV0")])).is_err());
    }

    #[test]
    fn policy_uses_configured_domain() {
        let config = Config::init_from_hashmap(&vars(&[
            ("DATABASE_URL", "postgres://localhost/events"),
            ("JWT_SECRET", "c2VjcmV0"),
            ("CAMPUS_EMAIL_DOMAIN", "example.edu"),
        ]))
        .unwrap();
        let policy = config.policy().unwrap();
        assert!(policy.check_username("asha@example.edu").is_ok());
        assert!(policy.check_username("asha@snuchennai.edu.in").is_err());
    }

    #[test]
    fn oversized_durations_fail_policy_construction() {
        let config = Config::init_from_hashmap(&vars(&[
            ("DATABASE_URL", "postgres://localhost/events"),
            ("JWT_SECRET", "c2VjcmV0"),
            ("MAX_EVENT_HOURS", "18446744073709551615"),
        ]))
        .unwrap();
        assert!(config.policy().is_err());
    }
}
