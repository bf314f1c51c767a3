//! Producer classification of access-log objects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream system that produced a log object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProducerType {
    /// CDN edge access logs. Also the fallback for unrecognized tokens.
    EdgeLog,
    /// API gateway access logs delivered through a firehose.
    ApiGatewayLog,
    /// Web ACL (firewall) logs delivered through a firehose.
    WebAclLog,
}

impl ProducerType {
    /// Classes in the order the promoter transforms them.
    pub const PROMOTION_ORDER: [ProducerType; 3] = [
        ProducerType::WebAclLog,
        ProducerType::EdgeLog,
        ProducerType::ApiGatewayLog,
    ];

    /// Classify a filename token by its first five characters.
    ///
    /// Shorter tokens are compared whole and therefore never match a known
    /// prefix.
    pub fn from_token(token: &str) -> Self {
        let lead: String = token.chars().take(5).collect();
        match lead.as_str() {
            "amazo" => ProducerType::ApiGatewayLog,
            "aws-w" => ProducerType::WebAclLog,
            _ => ProducerType::EdgeLog,
        }
    }

    /// Short code used in partitioned key prefixes and default table names.
    pub fn code(self) -> &'static str {
        match self {
            ProducerType::EdgeLog => "cf",
            ProducerType::ApiGatewayLog => "apig",
            ProducerType::WebAclLog => "waf",
        }
    }

    /// Top-level prefix of the partitioned namespace for this class,
    /// including the trailing separator.
    pub fn partitioned_prefix(self) -> String {
        format!("{}-partitioned-raw/", self.code())
    }
}

impl fmt::Display for ProducerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
