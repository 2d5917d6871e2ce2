//! SASL credentials and the SCRAM algorithm selector.
//!
//! librdkafka performs the challenge-response exchange itself; this module only
//! decides which mechanism and credentials it is handed.

use crate::error::{LagError, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaslAlgorithm {
    #[default]
    None,
    Sha256,
    Sha512,
}

impl SaslAlgorithm {
    /// librdkafka `sasl.mechanism` value when credentials are present.
    pub const fn mechanism(self) -> &'static str {
        match self {
            Self::None => "PLAIN",
            Self::Sha256 => "SCRAM-SHA-256",
            Self::Sha512 => "SCRAM-SHA-512",
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct SaslConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub algorithm: SaslAlgorithm,
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
}

fn default_security_protocol() -> String {
    "SASL_PLAINTEXT".to_string()
}

impl Default for SaslConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: String::new(),
            algorithm: SaslAlgorithm::None,
            security_protocol: default_security_protocol(),
        }
    }
}

impl SaslConfig {
    pub fn enabled(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.algorithm != SaslAlgorithm::None && !self.enabled() {
            return Err(LagError::Config(format!(
                "sasl algorithm {:?} requires a sasl username",
                self.algorithm
            )));
        }
        Ok(())
    }

    /// Client properties enabling authentication, empty when SASL is off.
    pub fn client_properties(&self) -> Vec<(&'static str, String)> {
        let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) else {
            return Vec::new();
        };

        vec![
            ("security.protocol", self.security_protocol.clone()),
            ("sasl.mechanism", self.algorithm.mechanism().to_string()),
            ("sasl.username", username.to_string()),
            ("sasl.password", self.password.clone()),
        ]
    }
}

impl std::fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslConfig")
            .field("username", &self.username)
            .field("algorithm", &self.algorithm)
            .field("security_protocol", &self.security_protocol)
            .finish_non_exhaustive()
    }
}
