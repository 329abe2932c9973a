//! Configuration module

use tessera_client::TesseraClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,

    /// Owner every request is made for
    pub owner_id: String,
}

impl Config {
    pub fn client(&self) -> TesseraClient {
        TesseraClient::new(&self.orchestrator_url, &self.owner_id)
    }
}
