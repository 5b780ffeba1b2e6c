//! Connectivity probe run before retrying a failed bootloader install,
//! since package-manager operations need repository access.

use std::time::Duration;

const PROBE_URL: &str = "http://detectportal.firefox.com/success.txt";

/// True if an HTTP round-trip to a well-known endpoint succeeds
pub fn internet_available() -> bool {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(10))
        .build();

    match agent.get(PROBE_URL).call() {
        Ok(resp) => resp.status() == 200,
        Err(e) => {
            tracing::debug!("connectivity probe failed: {}", e);
            false
        }
    }
}
