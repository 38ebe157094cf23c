// src/utils/env.rs

use log::{debug, warn};

/// Loads environment variables from a `.env` file if one is present.
/// Missing files are fine; binaries run off the process environment alone.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(dotenv::Error::Io(_)) => {
            debug!("No .env file found, using system environment variables")
        }
        Err(e) => warn!("Failed to parse .env file: {}", e),
    }
}
