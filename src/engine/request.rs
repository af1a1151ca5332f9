//! Quote request template.

use std::time::Duration;

use rand::Rng;

use crate::config::TargetSettings;
use crate::http::FormRequest;
use crate::model::Identity;
use crate::proxy::ProxyRef;

/// Builds the form body and per-attempt requests from [`TargetSettings`].
///
/// Only the item key, the identity fields and the configured random fields
/// vary between requests.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    target: TargetSettings,
}

impl RequestTemplate {
    pub fn new(target: TargetSettings) -> Self {
        Self { target }
    }

    /// Form fields for one item. Built once per item, reused for every attempt.
    pub fn form_for<R: Rng>(
        &self,
        item_key: &str,
        identity: &Identity,
        rng: &mut R,
    ) -> Vec<(String, String)> {
        let t = &self.target;
        let mut form: Vec<(String, String)> = t
            .form
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for field in &t.random_fields {
            let value = rng.gen_range(field.min..=field.max.max(field.min));
            form.push((field.name.clone(), value.to_string()));
        }

        form.push((t.key_field.clone(), item_key.to_string()));
        form.push((t.name_field.clone(), identity.name.clone()));
        form.push((t.email_field.clone(), identity.email.clone()));
        form.push((t.phone_field.clone(), identity.phone.clone()));
        form
    }

    /// A request for one attempt.
    pub fn request(
        &self,
        form: &[(String, String)],
        user_agent: String,
        proxy: Option<ProxyRef>,
    ) -> FormRequest {
        FormRequest {
            url: self.target.endpoint.clone(),
            headers: self
                .target
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            form: form.to_vec(),
            user_agent,
            proxy,
            timeout: Duration::from_secs(self.target.timeout_secs),
        }
    }

    /// A 200 whose body carries the rate-limit marker is not a success.
    pub fn is_rate_limited(&self, body: &str) -> bool {
        !self.target.rate_limit_marker.is_empty() && body.contains(&self.target.rate_limit_marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn identity() -> Identity {
        Identity {
            name: "James King".to_string(),
            email: "rivermaple731@yahoo.com".to_string(),
            phone: "(512) 401-7781".to_string(),
        }
    }

    fn field<'a>(form: &'a [(String, String)], name: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn form_carries_key_identity_and_static_fields() {
        let template = RequestTemplate::new(TargetSettings::default());
        let mut rng = StdRng::seed_from_u64(11);
        let form = template.form_for("78240", &identity(), &mut rng);

        assert_eq!(field(&form, "data[zip1]"), Some("78240"));
        assert_eq!(field(&form, "data[email]"), Some("rivermaple731@yahoo.com"));
        assert_eq!(field(&form, "data[name]"), Some("James King"));
        assert_eq!(field(&form, "action"), Some("submit_quote_function"));

        let rooms: u32 = field(&form, "data[rooms]").unwrap().parse().unwrap();
        assert!((2..=5).contains(&rooms));
    }

    #[test]
    fn rate_limit_marker_is_detected() {
        let template = RequestTemplate::new(TargetSettings::default());
        assert!(template.is_rate_limited(r#"{"success":false,"data":"limit_reached"}"#));
        assert!(!template.is_rate_limited(r#"{"success":true}"#));
    }
}
