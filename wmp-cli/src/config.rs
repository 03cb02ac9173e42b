//! Command-line configuration.
//!
//! Every flag can also be set through the environment, and a `.env` file in
//! the working directory is loaded before parsing.
//!
//! # Environment Variables
//!
//! - `WMP_PROVIDER_URL` - Base URL of the monetization provider
//! - `WMP_PAYMENT_POINTER` - Payment pointer to declare and pay
//! - `WMP_TOKEN` - Bearer token sent with negotiation requests
//! - `WMP_DISCOVERY` - `session-body` (default) or `location-link`
//! - `WMP_TIMEOUT_SECS` - Negotiation request timeout (default: `30`)

use std::time::Duration;

use clap::Parser;
use http::header::InvalidHeaderValue;
use url::Url;
use wmp_http::{ChannelDiscovery, ClientConfig};

/// Streams Web Monetization payments to a payment pointer.
#[derive(Debug, Clone, Parser)]
#[command(name = "wmp-cli", author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the monetization provider.
    #[arg(long, env = "WMP_PROVIDER_URL")]
    pub provider_url: Url,

    /// Payment pointer to declare, e.g. `$wallet.example/alice`.
    #[arg(long, env = "WMP_PAYMENT_POINTER")]
    pub payment_pointer: String,

    /// Bearer token for the provider.
    #[arg(long, env = "WMP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// How the channel of a new session is located.
    #[arg(long, env = "WMP_DISCOVERY", default_value_t = ChannelDiscovery::SessionBody)]
    pub discovery: ChannelDiscovery,

    /// Negotiation request timeout in seconds.
    #[arg(long, env = "WMP_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

impl Args {
    /// Builds the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidHeaderValue`] if the token cannot be sent as a header.
    pub fn client_config(&self) -> Result<ClientConfig, InvalidHeaderValue> {
        let config = ClientConfig::new()
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_channel_discovery(self.discovery);
        match &self.token {
            Some(token) => config.with_bearer(token),
            None => Ok(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "wmp-cli",
            "--provider-url",
            "https://wmp.example",
            "--payment-pointer",
            "$alice.example/pay",
            "--discovery",
            "location-link",
            "--timeout-secs",
            "5",
            "--token",
            "secret",
        ])
        .unwrap();

        assert_eq!(args.provider_url.as_str(), "https://wmp.example/");
        assert_eq!(args.payment_pointer, "$alice.example/pay");
        assert_eq!(args.discovery, ChannelDiscovery::LocationLink);

        let config = args.client_config().unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.channel_discovery(), ChannelDiscovery::LocationLink);
        assert!(config.headers().contains_key(http::header::AUTHORIZATION));
    }

    #[test]
    fn test_rejects_unknown_discovery() {
        let result = Args::try_parse_from([
            "wmp-cli",
            "--provider-url",
            "https://wmp.example",
            "--payment-pointer",
            "$alice.example/pay",
            "--discovery",
            "header",
        ]);
        assert!(result.is_err());
    }
}
