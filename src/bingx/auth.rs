use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

type HmacSha256 = Hmac<Sha256>;

pub type Params = BTreeMap<String, String>;

pub struct BingxAuth {
    api_key: String,
    api_secret: String,
    /// serverTime - localTime in ms, measured once per credential set
    time_offset_ms: AtomicI64,
}

impl BingxAuth {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
            time_offset_ms: AtomicI64::new(0),
        }
    }

    pub fn get_api_key(&self) -> &str {
        &self.api_key
    }

    pub fn set_time_offset(&self, offset_ms: i64) {
        self.time_offset_ms.store(offset_ms, Ordering::Relaxed);
    }

    pub fn time_offset(&self) -> i64 {
        self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// Local clock shifted onto the server clock
    pub fn timestamp(&self) -> i64 {
        Self::local_timestamp() + self.time_offset()
    }

    pub fn local_timestamp() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// HMAC-SHA256 of the query string, hex encoded
    pub fn generate_signature(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");

        mac.update(query.as_bytes());

        hex::encode(mac.finalize().into_bytes())
    }

    /// Stamps `params` with `timestamp` and returns the key-ordered query the
    /// signature is computed over, together with that signature.
    pub fn sign_params(&self, params: &mut Params, timestamp: i64) -> (String, String) {
        params.insert("timestamp".to_string(), timestamp.to_string());
        let query = canonical_query(params);
        let signature = self.generate_signature(&query);
        (query, signature)
    }
}

/// `k=v&k=v` in lexicographic key order, values unescaped
pub fn canonical_query(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Same ordering as `canonical_query`, values percent-encoded for the wire
pub fn encoded_query(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| {
            let value: String = url::form_urlencoded::byte_serialize(v.as_bytes()).collect();
            format!("{}={}", k, value)
        })
        .collect::<Vec<_>>()
        .join("&")
}
