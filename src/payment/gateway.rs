//! Z-Pay hosted-page gateway: payment URL construction and callback parsing.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

use crate::config::ZpayConfig;
use crate::error::AppError;
use crate::payment::sign::{generate_sign, verify_sign};

pub const TRADE_SUCCESS: &str = "TRADE_SUCCESS";

/// Only channel the merchant account has enabled.
pub const PAYMENT_METHOD_WXPAY: &str = "wxpay";

/// `JZ_YYYYMMDD_{unix_millis}_{RAND6}`
pub fn generate_order_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let random: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!(
        "JZ_{}_{}_{}",
        now.format("%Y%m%d"),
        now.timestamp_millis(),
        random
    )
}

/// Asynchronous notification from the gateway. `money` stays a string until
/// the amount check; the gateway signs the string form.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackParams {
    pub pid: String,
    pub trade_no: String,
    pub out_trade_no: String,
    #[serde(rename = "type")]
    pub payment_type: String,
    pub name: String,
    pub money: String,
    pub trade_status: String,
    pub sign: String,
    #[serde(default)]
    pub sign_type: Option<String>,
}

impl CallbackParams {
    /// All required fields present and non-empty.
    pub fn is_complete(&self) -> bool {
        !(self.pid.is_empty()
            || self.trade_no.is_empty()
            || self.out_trade_no.is_empty()
            || self.payment_type.is_empty()
            || self.name.is_empty()
            || self.money.is_empty()
            || self.trade_status.is_empty()
            || self.sign.is_empty())
    }

    /// The exact parameter set the gateway signed over.
    pub fn to_sign_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("pid".into(), self.pid.clone());
        map.insert("trade_no".into(), self.trade_no.clone());
        map.insert("out_trade_no".into(), self.out_trade_no.clone());
        map.insert("type".into(), self.payment_type.clone());
        map.insert("name".into(), self.name.clone());
        map.insert("money".into(), self.money.clone());
        map.insert("trade_status".into(), self.trade_status.clone());
        map.insert("sign".into(), self.sign.clone());
        if let Some(sign_type) = &self.sign_type {
            map.insert("sign_type".into(), sign_type.clone());
        }
        map
    }

    pub fn parsed_money(&self) -> Result<f64, AppError> {
        self.money
            .parse::<f64>()
            .map_err(|_| AppError::InvalidInput(format!("无法解析回调金额: {}", self.money)))
    }
}

pub struct ZpayGateway {
    config: ZpayConfig,
}

impl ZpayGateway {
    pub fn new(config: ZpayConfig) -> Self {
        Self { config }
    }

    pub fn pid(&self) -> &str {
        &self.config.pid
    }

    pub fn notify_url(&self) -> String {
        format!("{}/api/payment/callback", self.config.site_url)
    }

    pub fn return_url(&self, order_id: &str) -> String {
        format!("{}/payment/result?order_id={}", self.config.site_url, order_id)
    }

    /// Hosted-page redirect URL with a signature over the order parameters.
    pub fn build_payment_url(
        &self,
        order_id: &str,
        product_name: &str,
        amount: f64,
    ) -> Result<String, AppError> {
        if self.config.pid.is_empty() || self.config.key.is_empty() {
            return Err(AppError::ConfigError("payment gateway credentials missing".into()));
        }

        let mut params = BTreeMap::new();
        params.insert("pid".to_string(), self.config.pid.clone());
        params.insert("type".to_string(), PAYMENT_METHOD_WXPAY.to_string());
        params.insert("out_trade_no".to_string(), order_id.to_string());
        params.insert("notify_url".to_string(), self.notify_url());
        params.insert("return_url".to_string(), self.return_url(order_id));
        params.insert("name".to_string(), product_name.to_string());
        params.insert("money".to_string(), format!("{amount:.2}"));
        params.insert("sitename".to_string(), self.config.site_name.clone());

        let sign = generate_sign(&params, &self.config.key);
        params.insert("sign".to_string(), sign);
        params.insert("sign_type".to_string(), "MD5".to_string());

        let mut url = Url::parse(&self.config.submit_url)
            .map_err(|e| AppError::ConfigError(format!("invalid gateway submit url: {e}")))?;
        url.query_pairs_mut().extend_pairs(params.iter());
        Ok(url.to_string())
    }

    pub fn verify_callback(&self, params: &CallbackParams) -> bool {
        verify_sign(&params.to_sign_map(), &self.config.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use chrono::TimeZone;

    fn gateway() -> ZpayGateway {
        ZpayGateway::new(Settings::new_for_test().unwrap().zpay)
    }

    fn signed_callback(gateway: &ZpayGateway, money: &str) -> CallbackParams {
        let mut params = CallbackParams {
            pid: "1000".into(),
            trade_no: "2024110422001".into(),
            out_trade_no: "JZ_20241104_1730720000000_A1B2C3".into(),
            payment_type: "wxpay".into(),
            name: "月会员".into(),
            money: money.into(),
            trade_status: TRADE_SUCCESS.into(),
            sign: String::new(),
            sign_type: Some("MD5".into()),
        };
        params.sign = generate_sign(&params.to_sign_map(), "test_merchant_key");
        let _ = gateway;
        params
    }

    #[test]
    fn test_order_id_shape() {
        let now = Utc.with_ymd_and_hms(2024, 11, 4, 12, 30, 0).unwrap();
        let id = generate_order_id(now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "JZ");
        assert_eq!(parts[1], "20241104");
        assert_eq!(parts[2], now.timestamp_millis().to_string());
        assert_eq!(parts[3].len(), 6);
    }

    #[test]
    fn test_payment_url_contains_signed_params() {
        let url = gateway()
            .build_payment_url("JZ_20241104_1_ABC123", "月会员", 9.9)
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert_eq!(pairs.get("pid").map(String::as_str), Some("1000"));
        assert_eq!(pairs.get("type").map(String::as_str), Some("wxpay"));
        assert_eq!(pairs.get("money").map(String::as_str), Some("9.90"));
        assert_eq!(pairs.get("sign_type").map(String::as_str), Some("MD5"));
        assert_eq!(pairs.get("sitename").map(String::as_str), Some("降噪平台"));
        assert!(pairs.get("notify_url").unwrap().ends_with("/api/payment/callback"));
        assert!(pairs.get("return_url").unwrap().contains("order_id=JZ_20241104_1_ABC123"));
        assert_eq!(pairs.get("sign").unwrap().len(), 32);
    }

    #[test]
    fn test_amount_always_two_decimals() {
        let url = gateway().build_payment_url("JZ_1", "月会员", 7.9).unwrap();
        assert!(url.contains("money=7.90"));
    }

    #[test]
    fn test_callback_verification() {
        let gw = gateway();
        let params = signed_callback(&gw, "9.90");
        assert!(gw.verify_callback(&params));

        let mut tampered = params.clone();
        tampered.money = "0.01".into();
        assert!(!gw.verify_callback(&tampered));
    }

    #[test]
    fn test_callback_completeness() {
        let gw = gateway();
        let params = signed_callback(&gw, "9.90");
        assert!(params.is_complete());

        let mut incomplete = params;
        incomplete.trade_no = String::new();
        assert!(!incomplete.is_complete());
    }

    #[test]
    fn test_money_parsing() {
        let gw = gateway();
        assert!((signed_callback(&gw, "7.92").parsed_money().unwrap() - 7.92).abs() < 1e-9);
        assert!(signed_callback(&gw, "abc").parsed_money().is_err());
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let mut config = Settings::new_for_test().unwrap().zpay;
        config.pid = String::new();
        let err = ZpayGateway::new(config)
            .build_payment_url("JZ_1", "月会员", 9.9)
            .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
