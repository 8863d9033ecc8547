//! Tests for configuration

#[cfg(test)]
mod tests {
    use super::super::config::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_engine_config_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.quote_asset, "USDT");
        assert_eq!(config.paper_initial_balance, dec!(10000));
    }

    #[test]
    fn test_engine_config_deserialize() {
        let toml_str = r#"
poll_interval_secs = 2
quote_asset = "USDC"
paper_initial_balance = 2500.5
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.quote_asset, "USDC");
        assert_eq!(config.paper_initial_balance, dec!(2500.5));
    }

    #[test]
    fn test_binance_config_defaults() {
        let config: BinanceConfig = toml::from_str("").unwrap();
        assert_eq!(config.rest_url, "https://api.binance.com");
        assert!(config.api_key.is_none());
        assert!(config.api_secret.is_none());
        assert_eq!(config.recv_window_ms, 5000);
    }

    #[test]
    fn test_binance_config_with_keys() {
        let toml_str = r#"
rest_url = "https://testnet.binance.vision"
api_key = "key123"
api_secret = "secret456"
"#;
        let config: BinanceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rest_url, "https://testnet.binance.vision");
        assert_eq!(config.api_key, Some("key123".to_string()));
        assert_eq!(config.api_secret, Some("secret456".to_string()));
    }

    #[test]
    fn test_telegram_config_defaults() {
        let toml_str = r#"
bot_token = "123:abc"
chat_id = "12345"
"#;
        let config: TelegramConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.chat_id, "12345");
        assert!(config.notify_trades);
        assert!(config.notify_errors);
    }

    #[test]
    fn test_telegram_config_disabled_notifications() {
        let toml_str = r#"
bot_token = "123:abc"
chat_id = "12345"
notify_trades = false
"#;
        let config: TelegramConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.notify_trades);
        assert!(config.notify_errors); // defaults to true
    }

    #[test]
    fn test_database_config() {
        let toml_str = r#"
path = "data/sentinel.db"
"#;
        let config: DatabaseConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.path, "data/sentinel.db");
    }

    #[test]
    fn test_server_config_default_bind() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_full_config_minimal() {
        let toml_str = r#"
[database]
path = "sentinel.db"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.user_id, "default");
        assert_eq!(config.database.path, "sentinel.db");
        assert!(config.telegram.is_none());
        assert!(config.server.is_none());
        assert_eq!(config.engine.poll_interval_secs, 5);
        assert_eq!(config.binance.rest_url, "https://api.binance.com");
    }

    #[test]
    fn test_paper_and_real_fallbacks_stay_split() {
        // The two flows intentionally carry different fallbacks
        assert_eq!(DEFAULT_PAPER_RISK_PCT, dec!(0.25));
        assert_eq!(DEFAULT_REAL_RISK_PCT, dec!(0.01));
    }

    #[test]
    fn test_user_settings_defaults() {
        use crate::types::UserSettings;

        let settings = UserSettings::defaults_for("user-1");
        assert_eq!(settings.user_id, "user-1");
        assert_eq!(settings.version, 0);
        assert!(!settings.real_trading_active);
        assert_eq!(settings.max_real_trades, DEFAULT_MAX_REAL_TRADES);
        assert_eq!(settings.real_risk_pct(), DEFAULT_REAL_RISK_PCT);
        assert_eq!(settings.effective_paper_risk_pct(), DEFAULT_PAPER_RISK_PCT);
        assert_eq!(settings.take_profit_pct, dec!(0.05));
        assert_eq!(settings.trailing_stop_pct, dec!(0.02));
        assert_eq!(settings.trailing_stop_callback_rate, dec!(0.01));
        assert_eq!(settings.real_trades_executed_count, 0);
    }

    #[test]
    fn test_user_settings_explicit_pcts_win() {
        use crate::types::UserSettings;

        let mut settings = UserSettings::defaults_for("user-1");
        settings.per_trade_capital_pct = Some(dec!(0.02));
        settings.paper_risk_pct = Some(dec!(0.10));
        assert_eq!(settings.real_risk_pct(), dec!(0.02));
        assert_eq!(settings.effective_paper_risk_pct(), dec!(0.10));
    }
}
